//! Annotates pod containers with orchestrator-derived pod metadata
//!
//! For every `pod_container` set, resolves the owning pod in the cluster
//! cache and stamps identity labels, the container's base image, and the
//! request/limit gauges the agent cannot know. Synthesises the owning
//! `pod` set when the scrape did not produce one. A failed lookup leaves
//! the set untouched and increments the missing-metadata counter.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::core::{
    labels, pod_key, DataBatch, MetricSet, MetricSetType, MetricValue, METRIC_CPU_LIMIT,
    METRIC_CPU_REQUEST, METRIC_MEMORY_LIMIT, METRIC_MEMORY_REQUEST,
};
use crate::observability::PipelineMetrics;
use crate::orchestrator::{ClusterCache, PodInfo};
use crate::processors::DataProcessor;

pub struct PodBasedEnricher {
    cache: Arc<ClusterCache>,
    metrics: PipelineMetrics,
}

impl PodBasedEnricher {
    pub fn new(cache: Arc<ClusterCache>) -> Self {
        PodBasedEnricher {
            cache,
            metrics: PipelineMetrics::new(),
        }
    }

    fn enrich_container(&self, set: &mut MetricSet, pod: &PodInfo) {
        set.labels
            .insert(labels::POD_ID.to_string(), pod.uid.clone());
        set.labels
            .insert(labels::NODENAME.to_string(), pod.node_name.clone());
        if !pod.hostname.is_empty() {
            set.labels
                .insert(labels::HOSTNAME.to_string(), pod.hostname.clone());
        }
        if let Some(namespace) = self.cache.namespace(&pod.namespace) {
            set.labels
                .insert(labels::POD_NAMESPACE_UID.to_string(), namespace.uid);
        }
        if !pod.labels.is_empty() {
            set.labels
                .insert(labels::LABELS.to_string(), join_labels(&pod.labels));
        }

        let container_name = match set.labels.get(labels::CONTAINER_NAME) {
            Some(name) => name.clone(),
            None => return,
        };
        let Some(spec) = pod.containers.iter().find(|c| c.name == container_name) else {
            return;
        };

        if !spec.image.is_empty() {
            set.labels
                .insert(labels::CONTAINER_BASE_IMAGE.to_string(), spec.image.clone());
        }
        let requests = [
            (METRIC_CPU_REQUEST, spec.cpu_request_millicores),
            (METRIC_MEMORY_REQUEST, spec.memory_request_bytes),
        ];
        for (name, value) in requests {
            if value > 0 {
                set.metric_values
                    .insert(name.to_string(), MetricValue::Int64(value));
            }
        }
        // Limits may already have been derived from the container runtime;
        // the orchestrator spec only fills gaps.
        let limits = [
            (METRIC_CPU_LIMIT, spec.cpu_limit_millicores),
            (METRIC_MEMORY_LIMIT, spec.memory_limit_bytes),
        ];
        for (name, value) in limits {
            if value > 0 && !set.metric_values.contains_key(name) {
                set.metric_values
                    .insert(name.to_string(), MetricValue::Int64(value));
            }
        }
    }

    fn pod_metric_set(&self, pod: &PodInfo) -> MetricSet {
        let mut set_labels = BTreeMap::new();
        set_labels.insert(
            labels::METRIC_SET_TYPE.to_string(),
            MetricSetType::Pod.as_label().to_string(),
        );
        set_labels.insert(
            labels::NAMESPACE_NAME.to_string(),
            pod.namespace.clone(),
        );
        set_labels.insert(labels::POD_NAME.to_string(), pod.name.clone());
        set_labels.insert(labels::POD_ID.to_string(), pod.uid.clone());
        set_labels.insert(labels::NODENAME.to_string(), pod.node_name.clone());
        if !pod.hostname.is_empty() {
            set_labels.insert(labels::HOSTNAME.to_string(), pod.hostname.clone());
        }
        if let Some(namespace) = self.cache.namespace(&pod.namespace) {
            set_labels.insert(labels::POD_NAMESPACE_UID.to_string(), namespace.uid);
        }
        if !pod.labels.is_empty() {
            set_labels.insert(labels::LABELS.to_string(), join_labels(&pod.labels));
        }
        MetricSet {
            labels: set_labels,
            ..Default::default()
        }
    }
}

fn join_labels(pod_labels: &BTreeMap<String, String>) -> String {
    pod_labels
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

impl DataProcessor for PodBasedEnricher {
    fn name(&self) -> &'static str {
        "pod_based_enricher"
    }

    fn process(&self, mut batch: DataBatch) -> Result<DataBatch> {
        let container_keys: Vec<String> = batch
            .metric_sets
            .iter()
            .filter(|(_, set)| set.set_type() == Some(MetricSetType::PodContainer))
            .map(|(key, _)| key.clone())
            .collect();

        for key in container_keys {
            let Some(set) = batch.metric_sets.get(&key) else {
                continue;
            };
            let namespace = set.labels.get(labels::NAMESPACE_NAME).cloned();
            let pod_name = set.labels.get(labels::POD_NAME).cloned();
            let pod = match (&namespace, &pod_name) {
                (Some(namespace), Some(pod_name)) => self.cache.pod(namespace, pod_name),
                _ => None,
            };
            let Some(pod) = pod else {
                self.metrics.inc_missing_metadata(self.name());
                debug!(entity = %key, "No pod found for container; passing through");
                continue;
            };

            if let Some(set) = batch.metric_sets.get_mut(&key) {
                self.enrich_container(set, &pod);
            }

            let parent_key = pod_key(&pod.namespace, &pod.name);
            batch
                .metric_sets
                .entry(parent_key)
                .or_insert_with(|| self.pod_metric_set(&pod));
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ContainerSpecRef;
    use crate::processors::test_util::{batch_time, set_of};

    fn cache_with_pod() -> Arc<ClusterCache> {
        let cache = ClusterCache::new();
        cache.upsert_pod(PodInfo {
            name: "web-0".to_string(),
            namespace: "default".to_string(),
            uid: "uid-1".to_string(),
            node_name: "minion-1".to_string(),
            hostname: "minion-1".to_string(),
            labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
            containers: vec![ContainerSpecRef {
                name: "nginx".to_string(),
                image: "nginx:1.9".to_string(),
                cpu_request_millicores: 100,
                cpu_limit_millicores: 200,
                memory_request_bytes: 1 << 20,
                memory_limit_bytes: 1 << 22,
            }],
            ..Default::default()
        });
        cache.upsert_namespace(crate::orchestrator::NamespaceInfo {
            name: "default".to_string(),
            uid: "ns-uid-1".to_string(),
        });
        Arc::new(cache)
    }

    fn container_batch() -> DataBatch {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:default/pod:web-0/container:nginx".to_string(),
            set_of(
                MetricSetType::PodContainer,
                &[
                    (labels::NAMESPACE_NAME, "default"),
                    (labels::POD_NAME, "web-0"),
                    (labels::CONTAINER_NAME, "nginx"),
                ],
                &[],
            ),
        );
        batch
    }

    #[test]
    fn test_container_is_enriched_and_pod_synthesised() {
        let enricher = PodBasedEnricher::new(cache_with_pod());
        let result = enricher.process(container_batch()).unwrap();

        let container = &result.metric_sets["ns:default/pod:web-0/container:nginx"];
        assert_eq!(container.labels[labels::POD_ID], "uid-1");
        assert_eq!(container.labels[labels::NODENAME], "minion-1");
        assert_eq!(container.labels[labels::POD_NAMESPACE_UID], "ns-uid-1");
        assert_eq!(container.labels[labels::CONTAINER_BASE_IMAGE], "nginx:1.9");
        assert_eq!(container.labels[labels::LABELS], "app:web");
        assert_eq!(
            container.metric_values[METRIC_CPU_REQUEST],
            MetricValue::Int64(100)
        );
        assert_eq!(
            container.metric_values[METRIC_MEMORY_LIMIT],
            MetricValue::Int64(1 << 22)
        );

        let pod = &result.metric_sets["ns:default/pod:web-0"];
        assert_eq!(pod.set_type(), Some(MetricSetType::Pod));
        assert_eq!(pod.labels[labels::POD_ID], "uid-1");
        assert_eq!(pod.labels[labels::NODENAME], "minion-1");
    }

    #[test]
    fn test_runtime_limit_is_not_overwritten() {
        let enricher = PodBasedEnricher::new(cache_with_pod());
        let mut batch = container_batch();
        batch
            .metric_sets
            .get_mut("ns:default/pod:web-0/container:nginx")
            .unwrap()
            .metric_values
            .insert(METRIC_CPU_LIMIT.to_string(), MetricValue::Int64(500));

        let result = enricher.process(batch).unwrap();
        let container = &result.metric_sets["ns:default/pod:web-0/container:nginx"];
        assert_eq!(
            container.metric_values[METRIC_CPU_LIMIT],
            MetricValue::Int64(500)
        );
    }

    #[test]
    fn test_missing_pod_passes_through_unchanged() {
        let enricher = PodBasedEnricher::new(Arc::new(ClusterCache::new()));
        let batch = container_batch();
        let before = batch.clone();

        let result = enricher.process(batch).unwrap();
        assert_eq!(result, before);
    }

    #[test]
    fn test_enrichment_is_idempotent() {
        let enricher = PodBasedEnricher::new(cache_with_pod());
        let once = enricher.process(container_batch()).unwrap();
        let twice = enricher.process(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
