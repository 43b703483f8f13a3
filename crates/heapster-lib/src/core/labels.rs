//! Well-known label keys and metric-set classification

/// Classifies the entity a [`crate::core::MetricSet`] describes.
pub const METRIC_SET_TYPE: &str = "metric_set_type";

pub const NAMESPACE_NAME: &str = "namespace_name";
pub const POD_NAME: &str = "pod_name";
pub const POD_ID: &str = "pod_id";
pub const POD_NAMESPACE_UID: &str = "pod_namespace_uid";
pub const NAMESPACE_UID: &str = "namespace_uid";
pub const CONTAINER_NAME: &str = "container_name";
pub const CONTAINER_BASE_IMAGE: &str = "container_base_image";
pub const NODENAME: &str = "nodename";
pub const HOSTNAME: &str = "hostname";
pub const HOST_ID: &str = "host_id";
pub const RESOURCE_ID: &str = "resource_id";
/// Raw free-form labels of the underlying entity, comma-joined.
pub const LABELS: &str = "labels";

/// The closed set of entity classes in the roll-up hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSetType {
    /// A node-level system container (not owned by any pod).
    SysContainer,
    /// A container running inside a pod.
    PodContainer,
    Pod,
    Namespace,
    Node,
    Cluster,
}

impl MetricSetType {
    pub fn as_label(self) -> &'static str {
        match self {
            MetricSetType::SysContainer => "sys_container",
            MetricSetType::PodContainer => "pod_container",
            MetricSetType::Pod => "pod",
            MetricSetType::Namespace => "namespace",
            MetricSetType::Node => "node",
            MetricSetType::Cluster => "cluster",
        }
    }

    pub fn from_label(label: &str) -> Option<MetricSetType> {
        match label {
            "sys_container" => Some(MetricSetType::SysContainer),
            "pod_container" => Some(MetricSetType::PodContainer),
            "pod" => Some(MetricSetType::Pod),
            "namespace" => Some(MetricSetType::Namespace),
            "node" => Some(MetricSetType::Node),
            "cluster" => Some(MetricSetType::Cluster),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        for t in [
            MetricSetType::SysContainer,
            MetricSetType::PodContainer,
            MetricSetType::Pod,
            MetricSetType::Namespace,
            MetricSetType::Node,
            MetricSetType::Cluster,
        ] {
            assert_eq!(MetricSetType::from_label(t.as_label()), Some(t));
        }
        assert_eq!(MetricSetType::from_label("machine"), None);
    }
}
