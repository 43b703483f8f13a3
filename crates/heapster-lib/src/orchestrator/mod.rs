//! Orchestrator-derived cluster state
//!
//! The scrape and enrichment stages only ever read this cache; population
//! happens out of band, either from a static seed at startup or from a
//! background watch task owned by the embedding application. Lookups must
//! stay cheap and contention-free, so everything sits in concurrent maps.

mod sync;

pub use sync::{CacheRefresher, ClusterInfoSource};

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A schedulable node and its advertised resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    /// Address the node's metric agent is reachable on.
    pub address: String,
    pub host_id: String,
    pub cpu_capacity_millicores: i64,
    pub cpu_allocatable_millicores: i64,
    pub memory_capacity_bytes: i64,
    pub memory_allocatable_bytes: i64,
}

/// Resource requests and limits of a single container within a pod spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpecRef {
    pub name: String,
    pub image: String,
    pub cpu_request_millicores: i64,
    pub cpu_limit_millicores: i64,
    pub memory_request_bytes: i64,
    pub memory_limit_bytes: i64,
}

/// A pod as seen by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub node_name: String,
    pub hostname: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerSpecRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub uid: String,
}

/// Read-mostly snapshot of nodes, pods and namespaces.
#[derive(Default)]
pub struct ClusterCache {
    nodes: DashMap<String, NodeInfo>,
    /// Keyed by `namespace/name`.
    pods: DashMap<String, PodInfo>,
    namespaces: DashMap<String, NamespaceInfo>,
}

fn pod_cache_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_node(&self, node: NodeInfo) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn remove_node(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.remove(name).map(|(_, v)| v)
    }

    pub fn node(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.get(name).map(|r| r.clone())
    }

    /// All known nodes, ordered by name so scrape planning is stable.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.nodes.iter().map(|r| r.value().clone()).collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub fn upsert_pod(&self, pod: PodInfo) {
        self.pods
            .insert(pod_cache_key(&pod.namespace, &pod.name), pod);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.pods
            .remove(&pod_cache_key(namespace, name))
            .map(|(_, v)| v)
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.pods
            .get(&pod_cache_key(namespace, name))
            .map(|r| r.clone())
    }

    pub fn upsert_namespace(&self, namespace: NamespaceInfo) {
        self.namespaces
            .insert(namespace.name.clone(), namespace);
    }

    pub fn namespace(&self, name: &str) -> Option<NamespaceInfo> {
        self.namespaces.get(name).map(|r| r.clone())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Mirror the orchestrator's node listing, dropping vanished nodes.
    pub fn replace_nodes(&self, nodes: Vec<NodeInfo>) {
        let keep: std::collections::HashSet<String> =
            nodes.iter().map(|n| n.name.clone()).collect();
        self.nodes.retain(|name, _| keep.contains(name));
        for node in nodes {
            self.upsert_node(node);
        }
    }

    pub fn replace_pods(&self, pods: Vec<PodInfo>) {
        let keep: std::collections::HashSet<String> = pods
            .iter()
            .map(|p| pod_cache_key(&p.namespace, &p.name))
            .collect();
        self.pods.retain(|key, _| keep.contains(key));
        for pod in pods {
            self.upsert_pod(pod);
        }
    }

    pub fn replace_namespaces(&self, namespaces: Vec<NamespaceInfo>) {
        let keep: std::collections::HashSet<String> =
            namespaces.iter().map(|n| n.name.clone()).collect();
        self.namespaces.retain(|name, _| keep.contains(name));
        for namespace in namespaces {
            self.upsert_namespace(namespace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_listing_is_sorted() {
        let cache = ClusterCache::new();
        for name in ["minion-2", "minion-0", "minion-1"] {
            cache.upsert_node(NodeInfo {
                name: name.to_string(),
                ..Default::default()
            });
        }

        let names: Vec<String> = cache.nodes().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["minion-0", "minion-1", "minion-2"]);
    }

    #[test]
    fn test_pod_lookup_by_namespace_and_name() {
        let cache = ClusterCache::new();
        cache.upsert_pod(PodInfo {
            name: "web-0".to_string(),
            namespace: "default".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        });

        assert_eq!(cache.pod("default", "web-0").unwrap().uid, "uid-1");
        assert!(cache.pod("kube-system", "web-0").is_none());

        cache.remove_pod("default", "web-0");
        assert!(cache.pod("default", "web-0").is_none());
    }
}
