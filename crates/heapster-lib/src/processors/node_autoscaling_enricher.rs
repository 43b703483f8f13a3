//! Stamps node capacity and allocatable gauges onto node sets

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::core::{
    labels, DataBatch, MetricSetType, MetricValue, METRIC_CPU_NODE_ALLOCATABLE,
    METRIC_CPU_NODE_CAPACITY, METRIC_MEMORY_NODE_ALLOCATABLE, METRIC_MEMORY_NODE_CAPACITY,
};
use crate::observability::PipelineMetrics;
use crate::orchestrator::ClusterCache;
use crate::processors::DataProcessor;

pub struct NodeAutoscalingEnricher {
    cache: Arc<ClusterCache>,
    metrics: PipelineMetrics,
}

impl NodeAutoscalingEnricher {
    pub fn new(cache: Arc<ClusterCache>) -> Self {
        NodeAutoscalingEnricher {
            cache,
            metrics: PipelineMetrics::new(),
        }
    }
}

impl DataProcessor for NodeAutoscalingEnricher {
    fn name(&self) -> &'static str {
        "node_autoscaling_enricher"
    }

    fn process(&self, mut batch: DataBatch) -> Result<DataBatch> {
        for (key, set) in batch.metric_sets.iter_mut() {
            if set.set_type() != Some(MetricSetType::Node) {
                continue;
            }
            let Some(node_name) = set.labels.get(labels::NODENAME).cloned() else {
                self.metrics.inc_missing_metadata(self.name());
                debug!(entity = %key, "Node set without nodename label");
                continue;
            };
            let Some(node) = self.cache.node(&node_name) else {
                self.metrics.inc_missing_metadata(self.name());
                debug!(entity = %key, node = %node_name, "Node not in cache");
                continue;
            };

            let gauges = [
                (METRIC_CPU_NODE_CAPACITY, node.cpu_capacity_millicores),
                (METRIC_CPU_NODE_ALLOCATABLE, node.cpu_allocatable_millicores),
                (METRIC_MEMORY_NODE_CAPACITY, node.memory_capacity_bytes),
                (METRIC_MEMORY_NODE_ALLOCATABLE, node.memory_allocatable_bytes),
            ];
            for (name, value) in gauges {
                set.metric_values
                    .insert(name.to_string(), MetricValue::Int64(value));
            }
        }
        Ok(batch)
    }
}
