//! Annotates namespace-scoped sets with the namespace UID

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::core::{labels, namespace_key, DataBatch, MetricSet, MetricSetType};
use crate::observability::PipelineMetrics;
use crate::orchestrator::ClusterCache;
use crate::processors::DataProcessor;

pub struct NamespaceBasedEnricher {
    cache: Arc<ClusterCache>,
    metrics: PipelineMetrics,
}

impl NamespaceBasedEnricher {
    pub fn new(cache: Arc<ClusterCache>) -> Self {
        NamespaceBasedEnricher {
            cache,
            metrics: PipelineMetrics::new(),
        }
    }
}

impl DataProcessor for NamespaceBasedEnricher {
    fn name(&self) -> &'static str {
        "namespace_based_enricher"
    }

    fn process(&self, mut batch: DataBatch) -> Result<DataBatch> {
        let mut seen_namespaces: Vec<String> = Vec::new();

        for (key, set) in batch.metric_sets.iter_mut() {
            let applies = matches!(
                set.set_type(),
                Some(MetricSetType::Pod)
                    | Some(MetricSetType::PodContainer)
                    | Some(MetricSetType::Namespace)
            );
            if !applies {
                continue;
            }
            let Some(namespace) = set.labels.get(labels::NAMESPACE_NAME).cloned() else {
                continue;
            };
            match self.cache.namespace(&namespace) {
                Some(info) => {
                    set.labels
                        .insert(labels::NAMESPACE_UID.to_string(), info.uid);
                }
                None => {
                    self.metrics.inc_missing_metadata(self.name());
                    debug!(entity = %key, namespace = %namespace, "Namespace not in cache");
                }
            }
            seen_namespaces.push(namespace);
        }

        // Every namespace observed on a pod or container gets its own set.
        for namespace in seen_namespaces {
            let key = namespace_key(&namespace);
            batch.metric_sets.entry(key).or_insert_with(|| {
                let mut set_labels = BTreeMap::new();
                set_labels.insert(
                    labels::METRIC_SET_TYPE.to_string(),
                    MetricSetType::Namespace.as_label().to_string(),
                );
                set_labels.insert(labels::NAMESPACE_NAME.to_string(), namespace.clone());
                if let Some(info) = self.cache.namespace(&namespace) {
                    set_labels.insert(labels::NAMESPACE_UID.to_string(), info.uid);
                }
                MetricSet {
                    labels: set_labels,
                    ..Default::default()
                }
            });
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::NamespaceInfo;
    use crate::processors::test_util::{batch_time, set_of};

    fn cache() -> Arc<ClusterCache> {
        let cache = ClusterCache::new();
        cache.upsert_namespace(NamespaceInfo {
            name: "default".to_string(),
            uid: "ns-uid-1".to_string(),
        });
        Arc::new(cache)
    }

    #[test]
    fn test_namespace_uid_stamped_and_set_synthesised() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:default/pod:web-0".to_string(),
            set_of(
                MetricSetType::Pod,
                &[(labels::NAMESPACE_NAME, "default")],
                &[],
            ),
        );

        let enricher = NamespaceBasedEnricher::new(cache());
        let result = enricher.process(batch).unwrap();

        let pod = &result.metric_sets["ns:default/pod:web-0"];
        assert_eq!(pod.labels[labels::NAMESPACE_UID], "ns-uid-1");

        let namespace = &result.metric_sets["ns:default"];
        assert_eq!(namespace.set_type(), Some(MetricSetType::Namespace));
        assert_eq!(namespace.labels[labels::NAMESPACE_UID], "ns-uid-1");
    }

    #[test]
    fn test_unknown_namespace_degrades_entity_only() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:staging/pod:web-0".to_string(),
            set_of(
                MetricSetType::Pod,
                &[(labels::NAMESPACE_NAME, "staging")],
                &[],
            ),
        );

        let enricher = NamespaceBasedEnricher::new(cache());
        let result = enricher.process(batch).unwrap();

        let pod = &result.metric_sets["ns:staging/pod:web-0"];
        assert!(!pod.labels.contains_key(labels::NAMESPACE_UID));
        // The namespace set still exists so the roll-up has a parent.
        assert!(result.metric_sets.contains_key("ns:staging"));
    }

    #[test]
    fn test_enrichment_is_idempotent() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:default/pod:web-0".to_string(),
            set_of(
                MetricSetType::Pod,
                &[(labels::NAMESPACE_NAME, "default")],
                &[],
            ),
        );

        let enricher = NamespaceBasedEnricher::new(cache());
        let once = enricher.process(batch).unwrap();
        let twice = enricher.process(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
