//! Canonical entity-key construction
//!
//! Entity keys identify the subject of a metric set as a flat string so the
//! whole model fits a single map. Keys are deterministic: later scrape
//! cycles overwrite earlier samples for the same entity.

pub fn cluster_key() -> String {
    "cluster".to_string()
}

pub fn namespace_key(namespace: &str) -> String {
    format!("ns:{}", namespace)
}

pub fn node_key(node: &str) -> String {
    format!("node:{}", node)
}

pub fn pod_key(namespace: &str, pod: &str) -> String {
    format!("ns:{}/pod:{}", namespace, pod)
}

pub fn pod_container_key(namespace: &str, pod: &str, container: &str) -> String {
    format!("ns:{}/pod:{}/container:{}", namespace, pod, container)
}

pub fn node_container_key(node: &str, container: &str) -> String {
    format!("node:{}/container:{}", node, container)
}
