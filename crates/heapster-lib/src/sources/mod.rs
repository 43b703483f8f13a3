//! Metric scraping
//!
//! A [`MetricsSource`] produces one [`DataBatch`] per scrape window. The
//! kubelet-backed provider fans out over every known node with bounded
//! parallelism and a shared deadline; nodes that fail or overrun degrade
//! the batch instead of failing it.

pub mod cadvisor;
pub mod kubelet;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{
    labels, node_container_key, node_key, pod_container_key, DataBatch, LabeledMetric, MetricSet,
    MetricSetType, SUPPORTED_LABELED_METRICS, SUPPORTED_METRICS,
};
use crate::observability::PipelineMetrics;
use crate::orchestrator::{ClusterCache, NodeInfo};
use crate::sources::cadvisor::Container;
use crate::sources::kubelet::{Host, KubeletClient};

/// Capability set of a batch producer.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a batch covering `[start, end)`. Work past `deadline` must
    /// be abandoned; a partial or empty batch is returned instead of an
    /// error.
    async fn scrape(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        deadline: Instant,
    ) -> DataBatch;
}

/// Scrapes every node's metric agent in parallel.
pub struct KubeletProvider {
    cache: Arc<ClusterCache>,
    client: Arc<KubeletClient>,
    kubelet_port: u16,
    max_parallelism: usize,
    metrics: PipelineMetrics,
}

impl KubeletProvider {
    pub fn new(
        cache: Arc<ClusterCache>,
        client: KubeletClient,
        kubelet_port: u16,
        max_parallelism: usize,
    ) -> Self {
        KubeletProvider {
            cache,
            client: Arc::new(client),
            kubelet_port,
            max_parallelism: max_parallelism.max(1),
            metrics: PipelineMetrics::new(),
        }
    }

    async fn scrape_node(
        client: Arc<KubeletClient>,
        node: NodeInfo,
        port: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(String, MetricSet)>, kubelet::SourceError> {
        let host = Host {
            ip: node.address.clone(),
            port,
        };
        let containers = client.all_containers(&host, start, end).await?;
        debug!(
            node = %node.name,
            containers = containers.len(),
            "Scraped node agent"
        );
        Ok(containers
            .into_iter()
            .map(|c| container_to_metric_set(&node, c))
            .collect())
    }
}

#[async_trait]
impl MetricsSource for KubeletProvider {
    fn name(&self) -> &'static str {
        "kubelet"
    }

    async fn scrape(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        deadline: Instant,
    ) -> DataBatch {
        let mut batch = DataBatch::new(end);
        let nodes = self.cache.nodes();
        if nodes.is_empty() {
            warn!("No nodes in the cluster cache; emitting an empty batch");
            return batch;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut tasks = JoinSet::new();
        for node in nodes {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            let port = self.kubelet_port;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = tokio::time::timeout_at(
                    deadline,
                    Self::scrape_node(client, node.clone(), port, start, end),
                )
                .await;
                (node.name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (node_name, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Scrape task panicked");
                    continue;
                }
            };
            match result {
                Ok(Ok(sets)) => {
                    for (key, set) in sets {
                        batch.metric_sets.insert(key, set);
                    }
                }
                Ok(Err(e)) => {
                    self.metrics.inc_scrape_error(&node_name);
                    warn!(node = %node_name, error = %e, "Failed to scrape node");
                }
                Err(_elapsed) => {
                    self.metrics.inc_scrape_error(&node_name);
                    warn!(node = %node_name, "Node scrape exceeded its deadline");
                }
            }
        }

        batch
    }
}

/// Materialise a container sample into a metric set under its canonical
/// entity key. Keys are deterministic so later cycles overwrite earlier
/// samples for the same entity.
fn container_to_metric_set(node: &NodeInfo, container: Container) -> (String, MetricSet) {
    let mut set_labels = BTreeMap::new();
    set_labels.insert(labels::NODENAME.to_string(), node.name.clone());
    set_labels.insert(labels::HOSTNAME.to_string(), node.name.clone());
    set_labels.insert(labels::HOST_ID.to_string(), node.host_id.clone());

    let pod_name = container.spec.labels.get(cadvisor::LABEL_POD_NAME).cloned();
    let pod_namespace = container
        .spec
        .labels
        .get(cadvisor::LABEL_POD_NAMESPACE)
        .cloned();

    let key = match (&pod_namespace, &pod_name) {
        _ if container.name == "/" => {
            // The hierarchy root carries machine-level stats.
            set_labels.insert(
                labels::METRIC_SET_TYPE.to_string(),
                MetricSetType::Node.as_label().to_string(),
            );
            set_labels.insert(labels::CONTAINER_NAME.to_string(), "machine".to_string());
            node_key(&node.name)
        }
        (Some(namespace), Some(pod)) => {
            let container_name = container
                .spec
                .labels
                .get(cadvisor::LABEL_CONTAINER_NAME)
                .cloned()
                .unwrap_or_else(|| container.name.clone());
            set_labels.insert(
                labels::METRIC_SET_TYPE.to_string(),
                MetricSetType::PodContainer.as_label().to_string(),
            );
            set_labels.insert(labels::CONTAINER_NAME.to_string(), container_name.clone());
            set_labels.insert(labels::NAMESPACE_NAME.to_string(), namespace.clone());
            set_labels.insert(labels::POD_NAME.to_string(), pod.clone());
            if let Some(uid) = container.spec.labels.get(cadvisor::LABEL_POD_UID) {
                set_labels.insert(labels::POD_ID.to_string(), uid.clone());
            }
            pod_container_key(namespace, pod, &container_name)
        }
        _ => {
            let container_name = container.name.trim_start_matches('/').to_string();
            set_labels.insert(
                labels::METRIC_SET_TYPE.to_string(),
                MetricSetType::SysContainer.as_label().to_string(),
            );
            set_labels.insert(labels::CONTAINER_NAME.to_string(), container_name.clone());
            node_container_key(&node.name, &container_name)
        }
    };

    if let Some(image) = &container.spec.image {
        set_labels.insert(labels::CONTAINER_BASE_IMAGE.to_string(), image.clone());
    }

    let mut metric_values = BTreeMap::new();
    for metric in SUPPORTED_METRICS {
        if (metric.has_value)(&container.spec) {
            metric_values.insert(
                metric.descriptor.name.to_string(),
                (metric.get_value)(&container.spec, &container.stats),
            );
        }
    }

    let mut labeled_metrics: Vec<LabeledMetric> = Vec::new();
    for source in SUPPORTED_LABELED_METRICS {
        if (source.has_value)(&container.spec) {
            labeled_metrics.extend((source.get_values)(&container.spec, &container.stats));
        }
    }

    let set = MetricSet {
        labels: set_labels,
        metric_values,
        labeled_metrics,
        create_time: container.spec.creation_time,
        scrape_time: Some(container.stats.timestamp),
    };
    (key, set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ContainerSpec, ContainerStats, MetricValue, METRIC_CPU_USAGE, METRIC_MEMORY_USAGE,
        METRIC_UPTIME,
    };
    use chrono::TimeZone;
    use std::time::Duration;

    fn test_node() -> NodeInfo {
        NodeInfo {
            name: "minion-1".to_string(),
            address: "10.0.0.1".to_string(),
            host_id: "host-1".to_string(),
            ..Default::default()
        }
    }

    fn stats_at(ts: DateTime<Utc>) -> ContainerStats {
        ContainerStats {
            timestamp: ts,
            cpu_usage_total_ns: 1_000_000,
            memory_usage_bytes: 4096,
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_machine_container_becomes_node_set() {
        let container = Container {
            name: "/".to_string(),
            spec: ContainerSpec {
                has_cpu: true,
                has_memory: true,
                ..Default::default()
            },
            stats: stats_at(now()),
        };

        let (key, set) = container_to_metric_set(&test_node(), container);
        assert_eq!(key, "node:minion-1");
        assert_eq!(set.set_type(), Some(MetricSetType::Node));
        assert_eq!(set.labels[labels::CONTAINER_NAME], "machine");
        assert_eq!(set.labels[labels::NODENAME], "minion-1");
        assert_eq!(
            set.metric_values.get(METRIC_CPU_USAGE),
            Some(&MetricValue::Int64(1_000_000))
        );
        assert_eq!(
            set.metric_values.get(METRIC_MEMORY_USAGE),
            Some(&MetricValue::Int64(4096))
        );
    }

    #[test]
    fn test_pod_container_key_and_labels() {
        let mut spec_labels = BTreeMap::new();
        spec_labels.insert(cadvisor::LABEL_POD_NAME.to_string(), "web-0".to_string());
        spec_labels.insert(
            cadvisor::LABEL_POD_NAMESPACE.to_string(),
            "default".to_string(),
        );
        spec_labels.insert(cadvisor::LABEL_POD_UID.to_string(), "uid-1".to_string());
        spec_labels.insert(
            cadvisor::LABEL_CONTAINER_NAME.to_string(),
            "nginx".to_string(),
        );

        let created = now() - chrono::Duration::seconds(60);
        let container = Container {
            name: "k8s_nginx".to_string(),
            spec: ContainerSpec {
                creation_time: Some(created),
                labels: spec_labels,
                has_cpu: true,
                ..Default::default()
            },
            stats: stats_at(now()),
        };

        let (key, set) = container_to_metric_set(&test_node(), container);
        assert_eq!(key, "ns:default/pod:web-0/container:nginx");
        assert_eq!(set.set_type(), Some(MetricSetType::PodContainer));
        assert_eq!(set.labels[labels::POD_NAME], "web-0");
        assert_eq!(set.labels[labels::NAMESPACE_NAME], "default");
        assert_eq!(set.labels[labels::POD_ID], "uid-1");
        assert_eq!(set.create_time, Some(created));
        assert_eq!(set.scrape_time, Some(now()));
        assert_eq!(
            set.metric_values.get(METRIC_UPTIME),
            Some(&MetricValue::Int64(60_000))
        );
    }

    #[test]
    fn test_system_container_key() {
        let container = Container {
            name: "/system.slice/sshd.service".to_string(),
            spec: ContainerSpec {
                has_memory: true,
                ..Default::default()
            },
            stats: stats_at(now()),
        };

        let (key, set) = container_to_metric_set(&test_node(), container);
        assert_eq!(key, "node:minion-1/container:system.slice/sshd.service");
        assert_eq!(set.set_type(), Some(MetricSetType::SysContainer));
    }

    #[tokio::test]
    async fn test_scrape_with_empty_cache_yields_empty_batch() {
        let cache = Arc::new(ClusterCache::new());
        let client = KubeletClient::new(Duration::from_secs(1)).unwrap();
        let provider = KubeletProvider::new(cache, client, 10255, 4);

        let end = now();
        let start = end - chrono::Duration::seconds(30);
        let batch = provider
            .scrape(start, end, Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(batch.timestamp, end);
        assert!(batch.metric_sets.is_empty());
    }
}
