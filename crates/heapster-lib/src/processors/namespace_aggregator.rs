//! Sums pods into their namespace

use anyhow::Result;
use tracing::debug;

use crate::core::{labels, namespace_key, DataBatch, MetricSetType};
use crate::observability::PipelineMetrics;
use crate::processors::{DataProcessor, LinkResult};

pub struct NamespaceAggregator {
    metrics_to_aggregate: Vec<String>,
    metrics: PipelineMetrics,
}

impl NamespaceAggregator {
    pub fn new(metrics_to_aggregate: Vec<String>) -> Self {
        NamespaceAggregator {
            metrics_to_aggregate,
            metrics: PipelineMetrics::new(),
        }
    }
}

impl DataProcessor for NamespaceAggregator {
    fn name(&self) -> &'static str {
        "namespace_aggregator"
    }

    fn process(&self, batch: DataBatch) -> Result<DataBatch> {
        Ok(crate::processors::roll_up(
            batch,
            MetricSetType::Namespace,
            &self.metrics_to_aggregate,
            |set| {
                if set.set_type() != Some(MetricSetType::Pod) {
                    return None;
                }
                match set.labels.get(labels::NAMESPACE_NAME) {
                    Some(namespace) => Some(LinkResult::Parent(namespace_key(namespace))),
                    None => Some(LinkResult::MissingLink),
                }
            },
            |key| {
                self.metrics.inc_missing_metadata(self.name());
                debug!(entity = %key, "Pod without namespace label; skipping");
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MetricValue, METRIC_MEMORY_USAGE};
    use crate::processors::test_util::{batch_time, set_of};

    #[test]
    fn test_pods_sum_into_namespace() {
        let mut batch = DataBatch::new(batch_time());
        for (key, pod, usage) in [
            ("ns:default/pod:web-0", "web-0", 100),
            ("ns:default/pod:web-1", "web-1", 300),
        ] {
            batch.metric_sets.insert(
                key.to_string(),
                set_of(
                    MetricSetType::Pod,
                    &[
                        (labels::NAMESPACE_NAME, "default"),
                        (labels::POD_NAME, pod),
                    ],
                    &[(METRIC_MEMORY_USAGE, usage)],
                ),
            );
        }

        let aggregator = NamespaceAggregator::new(vec![METRIC_MEMORY_USAGE.to_string()]);
        let result = aggregator.process(batch).unwrap();

        let namespace = &result.metric_sets["ns:default"];
        assert_eq!(namespace.set_type(), Some(MetricSetType::Namespace));
        assert_eq!(
            namespace.metric_values[METRIC_MEMORY_USAGE],
            MetricValue::Int64(400)
        );
    }

    #[test]
    fn test_pod_containers_do_not_contribute() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:default/pod:web-0/container:nginx".to_string(),
            set_of(
                MetricSetType::PodContainer,
                &[(labels::NAMESPACE_NAME, "default")],
                &[(METRIC_MEMORY_USAGE, 50)],
            ),
        );

        let aggregator = NamespaceAggregator::new(vec![METRIC_MEMORY_USAGE.to_string()]);
        let result = aggregator.process(batch).unwrap();
        assert!(!result.metric_sets.contains_key("ns:default"));
    }
}
