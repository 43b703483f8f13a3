//! Sums pods into the node they are scheduled on

use anyhow::Result;
use tracing::debug;

use crate::core::{labels, node_key, DataBatch, MetricSetType};
use crate::observability::PipelineMetrics;
use crate::processors::{DataProcessor, LinkResult};

pub struct NodeAggregator {
    metrics_to_aggregate: Vec<String>,
    metrics: PipelineMetrics,
}

impl NodeAggregator {
    pub fn new(metrics_to_aggregate: Vec<String>) -> Self {
        NodeAggregator {
            metrics_to_aggregate,
            metrics: PipelineMetrics::new(),
        }
    }
}

impl DataProcessor for NodeAggregator {
    fn name(&self) -> &'static str {
        "node_aggregator"
    }

    fn process(&self, batch: DataBatch) -> Result<DataBatch> {
        Ok(crate::processors::roll_up(
            batch,
            MetricSetType::Node,
            &self.metrics_to_aggregate,
            |set| {
                if set.set_type() != Some(MetricSetType::Pod) {
                    return None;
                }
                match set.labels.get(labels::NODENAME) {
                    Some(node) => Some(LinkResult::Parent(node_key(node))),
                    None => Some(LinkResult::MissingLink),
                }
            },
            |key| {
                self.metrics.inc_missing_metadata(self.name());
                debug!(entity = %key, "Pod without node label; skipping");
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MetricValue, METRIC_CPU_USAGE_RATE};
    use crate::processors::test_util::{batch_time, set_of};

    #[test]
    fn test_pods_sum_into_their_node() {
        let mut batch = DataBatch::new(batch_time());
        batch.metric_sets.insert(
            "ns:default/pod:web-0".to_string(),
            set_of(
                MetricSetType::Pod,
                &[(labels::NODENAME, "minion-1")],
                &[(METRIC_CPU_USAGE_RATE, 120)],
            ),
        );
        batch.metric_sets.insert(
            "ns:default/pod:web-1".to_string(),
            set_of(
                MetricSetType::Pod,
                &[(labels::NODENAME, "minion-1")],
                &[(METRIC_CPU_USAGE_RATE, 30)],
            ),
        );
        // A pod missing its node label degrades alone.
        batch.metric_sets.insert(
            "ns:default/pod:lost".to_string(),
            set_of(MetricSetType::Pod, &[], &[(METRIC_CPU_USAGE_RATE, 999)]),
        );

        let aggregator = NodeAggregator::new(vec![METRIC_CPU_USAGE_RATE.to_string()]);
        let result = aggregator.process(batch).unwrap();

        let node = &result.metric_sets["node:minion-1"];
        assert_eq!(
            node.metric_values[METRIC_CPU_USAGE_RATE],
            MetricValue::Int64(150)
        );
        assert!(result.metric_sets.contains_key("ns:default/pod:lost"));
    }
}
