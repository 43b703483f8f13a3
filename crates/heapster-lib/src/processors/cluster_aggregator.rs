//! Sums namespaces and system containers into the cluster set

use anyhow::Result;

use crate::core::{cluster_key, DataBatch, MetricSetType};
use crate::processors::{DataProcessor, LinkResult};

pub struct ClusterAggregator {
    metrics_to_aggregate: Vec<String>,
}

impl ClusterAggregator {
    pub fn new(metrics_to_aggregate: Vec<String>) -> Self {
        ClusterAggregator {
            metrics_to_aggregate,
        }
    }
}

impl DataProcessor for ClusterAggregator {
    fn name(&self) -> &'static str {
        "cluster_aggregator"
    }

    fn process(&self, batch: DataBatch) -> Result<DataBatch> {
        Ok(crate::processors::roll_up(
            batch,
            MetricSetType::Cluster,
            &self.metrics_to_aggregate,
            |set| match set.set_type() {
                Some(MetricSetType::Namespace) | Some(MetricSetType::SysContainer) => {
                    Some(LinkResult::Parent(cluster_key()))
                }
                _ => None,
            },
            // The cluster key never depends on a label, so there is no
            // missing-link case.
            |_key| {},
        ))
    }
}
