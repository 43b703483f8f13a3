//! Batches, metric sets and tagged sample values

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single sample value, tagged with its numeric representation.
///
/// Aggregation is value-type-preserving: adding two integers stays integer,
/// mixing an integer with a float promotes the result to float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Int64(i64),
    Float(f64),
}

impl MetricValue {
    /// Sum of `self` and `other` under the promotion rules.
    pub fn add(self, other: MetricValue) -> MetricValue {
        match (self, other) {
            (MetricValue::Int64(a), MetricValue::Int64(b)) => MetricValue::Int64(a + b),
            (a, b) => MetricValue::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Int64(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }

    /// Conversion used by the in-memory store, which holds unsigned buckets.
    /// Negative values clamp to zero; the caller is expected to count clamps.
    pub fn to_u64_clamped(self) -> (u64, bool) {
        match self {
            MetricValue::Int64(v) if v < 0 => (0, true),
            MetricValue::Int64(v) => (v as u64, false),
            MetricValue::Float(v) if v < 0.0 => (0, true),
            MetricValue::Float(v) => (v as u64, false),
        }
    }

    /// The additive zero matching this value's representation.
    pub fn zero_like(self) -> MetricValue {
        match self {
            MetricValue::Int64(_) => MetricValue::Int64(0),
            MetricValue::Float(_) => MetricValue::Float(0.0),
        }
    }
}

/// A metric whose identity requires per-sample labels, e.g. filesystem
/// metrics keyed by device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledMetric {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: MetricValue,
}

/// One entity's sample at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// Label key -> value. Well-known keys live in [`crate::core::labels`].
    pub labels: BTreeMap<String, String>,
    /// Metric name -> value; each name appears at most once.
    pub metric_values: BTreeMap<String, MetricValue>,
    /// Metrics that repeat per label set (filesystems keyed by device).
    pub labeled_metrics: Vec<LabeledMetric>,
    /// Creation instant of the underlying entity, when known. Together with
    /// `scrape_time` this drives cumulative-rate computation.
    pub create_time: Option<DateTime<Utc>>,
    /// Instant the sample was taken on the node agent.
    pub scrape_time: Option<DateTime<Utc>>,
}

impl MetricSet {
    /// Convenience accessor for the `metric_set_type` label.
    pub fn set_type(&self) -> Option<crate::core::MetricSetType> {
        self.labels
            .get(crate::core::labels::METRIC_SET_TYPE)
            .and_then(|v| crate::core::MetricSetType::from_label(v))
    }
}

/// The unit of work flowing through the pipeline: every entity scraped in
/// one cycle, keyed by canonical entity key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    pub timestamp: DateTime<Utc>,
    pub metric_sets: BTreeMap<String, MetricSet>,
}

impl DataBatch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        DataBatch {
            timestamp,
            metric_sets: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_preserves_int() {
        let sum = MetricValue::Int64(100).add(MetricValue::Int64(50));
        assert_eq!(sum, MetricValue::Int64(150));
    }

    #[test]
    fn test_add_promotes_to_float() {
        let sum = MetricValue::Int64(100).add(MetricValue::Float(0.5));
        assert_eq!(sum, MetricValue::Float(100.5));

        let sum = MetricValue::Float(1.5).add(MetricValue::Int64(2));
        assert_eq!(sum, MetricValue::Float(3.5));
    }

    #[test]
    fn test_clamped_conversion() {
        assert_eq!(MetricValue::Int64(42).to_u64_clamped(), (42, false));
        assert_eq!(MetricValue::Int64(-1).to_u64_clamped(), (0, true));
        assert_eq!(MetricValue::Float(3.9).to_u64_clamped(), (3, false));
        assert_eq!(MetricValue::Float(-0.1).to_u64_clamped(), (0, true));
    }
}
