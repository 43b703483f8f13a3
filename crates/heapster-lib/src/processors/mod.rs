//! Batch processors
//!
//! Processors run in declared order between the scrape and the sink
//! hand-off: enrichers first, then the rate calculator, then the
//! aggregators bottom-up (pod -> namespace/node -> cluster). Each consumes a
//! batch and returns a new one; a lookup failure degrades the affected
//! entity only and never fails the batch.

mod cluster_aggregator;
mod namespace_aggregator;
mod namespace_enricher;
mod node_aggregator;
mod node_autoscaling_enricher;
mod pod_aggregator;
mod pod_enricher;
mod rate_calculator;

pub use cluster_aggregator::ClusterAggregator;
pub use namespace_aggregator::NamespaceAggregator;
pub use namespace_enricher::NamespaceBasedEnricher;
pub use node_aggregator::NodeAggregator;
pub use node_autoscaling_enricher::NodeAutoscalingEnricher;
pub use pod_aggregator::PodAggregator;
pub use pod_enricher::PodBasedEnricher;
pub use rate_calculator::RateCalculator;

use std::collections::BTreeMap;

use anyhow::Result;

use crate::core::{labels, DataBatch, MetricSet, MetricSetType, MetricValue};

/// Capability set of a pipeline stage between source and sinks.
pub trait DataProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, batch: DataBatch) -> Result<DataBatch>;
}

/// The default roll-up set: additive metrics only.
pub fn default_metrics_to_aggregate() -> Vec<String> {
    [
        crate::core::METRIC_CPU_USAGE_RATE,
        crate::core::METRIC_MEMORY_USAGE,
        crate::core::METRIC_CPU_REQUEST,
        crate::core::METRIC_CPU_LIMIT,
        crate::core::METRIC_MEMORY_REQUEST,
        crate::core::METRIC_MEMORY_LIMIT,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// A parent set synthesised during aggregation carries only its type.
fn bare_metric_set(set_type: MetricSetType) -> MetricSet {
    let mut set_labels = BTreeMap::new();
    set_labels.insert(
        labels::METRIC_SET_TYPE.to_string(),
        set_type.as_label().to_string(),
    );
    MetricSet {
        labels: set_labels,
        ..Default::default()
    }
}

/// Shared roll-up driver. `link` classifies each set as a contributing
/// child by returning its parent's entity key; children that should have
/// linked but could not are reported through `on_missing_link`.
///
/// For every aggregated metric with at least one contributing child, the
/// parent ends up carrying exactly the children's sum under the usual
/// promotion rules. Parent metrics nobody contributed to are left alone.
fn roll_up<L, M>(
    mut batch: DataBatch,
    parent_type: MetricSetType,
    metrics_to_aggregate: &[String],
    link: L,
    mut on_missing_link: M,
) -> DataBatch
where
    L: Fn(&MetricSet) -> Option<LinkResult>,
    M: FnMut(&str),
{
    let mut sums: BTreeMap<String, BTreeMap<String, MetricValue>> = BTreeMap::new();

    for (key, set) in &batch.metric_sets {
        match link(set) {
            Some(LinkResult::Parent(parent_key)) => {
                let parent_sums = sums.entry(parent_key).or_default();
                for name in metrics_to_aggregate {
                    if let Some(&value) = set.metric_values.get(name) {
                        let acc = match parent_sums.get(name) {
                            Some(&acc) => acc.add(value),
                            None => value,
                        };
                        parent_sums.insert(name.clone(), acc);
                    }
                }
            }
            Some(LinkResult::MissingLink) => on_missing_link(key),
            None => {}
        }
    }

    for (parent_key, parent_sums) in sums {
        let parent = batch
            .metric_sets
            .entry(parent_key)
            .or_insert_with(|| bare_metric_set(parent_type));
        for (name, value) in parent_sums {
            parent.metric_values.insert(name, value);
        }
    }

    batch
}

/// Outcome of classifying one metric set during a roll-up pass.
enum LinkResult {
    /// The set is a contributing child of the given parent key.
    Parent(String),
    /// The set should contribute but lacks its linking label.
    MissingLink,
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    pub fn batch_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap()
    }

    /// A metric set with the given type, labels and int64 values.
    pub fn set_of(
        set_type: MetricSetType,
        set_labels: &[(&str, &str)],
        values: &[(&str, i64)],
    ) -> MetricSet {
        let mut set = bare_metric_set(set_type);
        for (k, v) in set_labels {
            set.labels.insert(k.to_string(), v.to_string());
        }
        for (name, v) in values {
            set.metric_values
                .insert(name.to_string(), MetricValue::Int64(*v));
        }
        set
    }
}
