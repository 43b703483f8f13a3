//! Sums pod containers into their owning pod

use anyhow::Result;
use tracing::debug;

use crate::core::{labels, pod_key, DataBatch, MetricSetType};
use crate::observability::PipelineMetrics;
use crate::processors::{DataProcessor, LinkResult};

pub struct PodAggregator {
    metrics_to_aggregate: Vec<String>,
    metrics: PipelineMetrics,
}

impl PodAggregator {
    pub fn new(metrics_to_aggregate: Vec<String>) -> Self {
        PodAggregator {
            metrics_to_aggregate,
            metrics: PipelineMetrics::new(),
        }
    }
}

impl DataProcessor for PodAggregator {
    fn name(&self) -> &'static str {
        "pod_aggregator"
    }

    fn process(&self, batch: DataBatch) -> Result<DataBatch> {
        Ok(crate::processors::roll_up(
            batch,
            MetricSetType::Pod,
            &self.metrics_to_aggregate,
            |set| {
                if set.set_type() != Some(MetricSetType::PodContainer) {
                    return None;
                }
                let namespace = set.labels.get(labels::NAMESPACE_NAME);
                let pod = set.labels.get(labels::POD_NAME);
                match (namespace, pod) {
                    (Some(namespace), Some(pod)) => {
                        Some(LinkResult::Parent(pod_key(namespace, pod)))
                    }
                    _ => Some(LinkResult::MissingLink),
                }
            },
            |key| {
                self.metrics.inc_missing_metadata(self.name());
                debug!(entity = %key, "Pod container without pod identity; skipping");
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MetricValue, METRIC_CPU_USAGE_RATE, METRIC_MEMORY_USAGE};
    use crate::processors::test_util::{batch_time, set_of};

    fn aggregator() -> PodAggregator {
        PodAggregator::new(vec![
            METRIC_CPU_USAGE_RATE.to_string(),
            METRIC_MEMORY_USAGE.to_string(),
        ])
    }

    #[test]
    fn test_containers_sum_into_pod() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:default/pod:web-0/container:nginx".to_string(),
            set_of(
                MetricSetType::PodContainer,
                &[
                    (labels::NAMESPACE_NAME, "default"),
                    (labels::POD_NAME, "web-0"),
                ],
                &[(METRIC_CPU_USAGE_RATE, 100), (METRIC_MEMORY_USAGE, 1 << 20)],
            ),
        );
        batch.metric_sets.insert(
            "ns:default/pod:web-0/container:sidecar".to_string(),
            set_of(
                MetricSetType::PodContainer,
                &[
                    (labels::NAMESPACE_NAME, "default"),
                    (labels::POD_NAME, "web-0"),
                ],
                &[(METRIC_CPU_USAGE_RATE, 50)],
            ),
        );

        let result = aggregator().process(batch).unwrap();
        let pod = &result.metric_sets["ns:default/pod:web-0"];
        assert_eq!(pod.set_type(), Some(MetricSetType::Pod));
        assert_eq!(
            pod.metric_values[METRIC_CPU_USAGE_RATE],
            MetricValue::Int64(150)
        );
        // The container without a memory sample contributes zero.
        assert_eq!(
            pod.metric_values[METRIC_MEMORY_USAGE],
            MetricValue::Int64(1 << 20)
        );
    }

    #[test]
    fn test_existing_pod_set_receives_the_sum() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:default/pod:web-0".to_string(),
            set_of(
                MetricSetType::Pod,
                &[
                    (labels::NAMESPACE_NAME, "default"),
                    (labels::POD_NAME, "web-0"),
                ],
                &[],
            ),
        );
        batch.metric_sets.insert(
            "ns:default/pod:web-0/container:nginx".to_string(),
            set_of(
                MetricSetType::PodContainer,
                &[
                    (labels::NAMESPACE_NAME, "default"),
                    (labels::POD_NAME, "web-0"),
                ],
                &[(METRIC_CPU_USAGE_RATE, 70)],
            ),
        );

        let result = aggregator().process(batch).unwrap();
        let pod = &result.metric_sets["ns:default/pod:web-0"];
        // Enricher-provided labels survive aggregation.
        assert_eq!(pod.labels[labels::NAMESPACE_NAME], "default");
        assert_eq!(
            pod.metric_values[METRIC_CPU_USAGE_RATE],
            MetricValue::Int64(70)
        );
    }

    #[test]
    fn test_container_without_pod_identity_is_skipped() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "orphan".to_string(),
            set_of(
                MetricSetType::PodContainer,
                &[],
                &[(METRIC_CPU_USAGE_RATE, 100)],
            ),
        );

        let result = aggregator().process(batch).unwrap();
        // No pod was synthesised; the orphan passes through untouched.
        assert_eq!(result.metric_sets.len(), 1);
        assert!(result.metric_sets.contains_key("orphan"));
    }

    #[test]
    fn test_float_promotion_in_sums() {
        let mut batch = DataBatch::new(batch_time());
        let mut first = set_of(
            MetricSetType::PodContainer,
            &[
                (labels::NAMESPACE_NAME, "default"),
                (labels::POD_NAME, "web-0"),
            ],
            &[],
        );
        first
            .metric_values
            .insert(METRIC_CPU_USAGE_RATE.to_string(), MetricValue::Float(1.5));
        batch
            .metric_sets
            .insert("ns:default/pod:web-0/container:a".to_string(), first);
        batch.metric_sets.insert(
            "ns:default/pod:web-0/container:b".to_string(),
            set_of(
                MetricSetType::PodContainer,
                &[
                    (labels::NAMESPACE_NAME, "default"),
                    (labels::POD_NAME, "web-0"),
                ],
                &[(METRIC_CPU_USAGE_RATE, 2)],
            ),
        );

        let result = aggregator().process(batch).unwrap();
        let pod = &result.metric_sets["ns:default/pod:web-0"];
        assert_eq!(
            pod.metric_values[METRIC_CPU_USAGE_RATE],
            MetricValue::Float(3.5)
        );
    }
}
