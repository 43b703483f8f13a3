//! The in-process sink backing the model queries
//!
//! Keeps one [`StatStore`] per (entity key, metric name). Stores are
//! created lazily on first export and dropped with the sink; retention is
//! `resolution × capacity`. Queries take the read side of the lock,
//! exports the write side.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::core::DataBatch;
use crate::observability::PipelineMetrics;
use crate::sinks::DataSink;
use crate::store::{StatStore, StoreError, TimePoint};

/// Bucketing parameters applied to lazily created stores.
#[derive(Debug, Clone)]
pub struct StoreParams {
    pub resolution: Duration,
    /// Number of resolutions retained per store.
    pub capacity: usize,
    pub percentiles: Vec<f64>,
    pub default_epsilon: u64,
    /// Per-metric epsilon overrides, matched on the metric name.
    pub epsilon_overrides: BTreeMap<String, u64>,
}

impl Default for StoreParams {
    fn default() -> Self {
        let mut epsilon_overrides = BTreeMap::new();
        // Millicore-denominated metrics quantise much finer than bytes.
        for name in [
            crate::core::METRIC_CPU_USAGE_RATE,
            crate::core::METRIC_CPU_REQUEST,
            crate::core::METRIC_CPU_LIMIT,
        ] {
            epsilon_overrides.insert(name.to_string(), 10);
        }
        for name in [
            crate::core::METRIC_MEMORY_USAGE,
            crate::core::METRIC_MEMORY_WORKING_SET,
            crate::core::METRIC_MEMORY_REQUEST,
            crate::core::METRIC_MEMORY_LIMIT,
        ] {
            epsilon_overrides.insert(name.to_string(), 1 << 20);
        }

        StoreParams {
            resolution: Duration::seconds(30),
            capacity: 30,
            percentiles: vec![0.5, 0.95, 0.99],
            default_epsilon: 100,
            epsilon_overrides,
        }
    }
}

impl StoreParams {
    fn epsilon_for(&self, metric: &str) -> u64 {
        self.epsilon_overrides
            .get(metric)
            .copied()
            .unwrap_or(self.default_epsilon)
    }
}

/// Aggregate view over one store, answered from the memoised aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStats {
    pub average: u64,
    pub max: u64,
    /// (percentile, bucket) pairs for the configured percentile set.
    pub percentiles: Vec<(f64, u64)>,
}

/// Ring-of-stores sink; always receives every batch the manager emits.
pub struct MetricSink {
    params: StoreParams,
    /// entity key -> metric name -> store
    stores: RwLock<HashMap<String, HashMap<String, StatStore>>>,
    latest: RwLock<Option<DateTime<Utc>>>,
    metrics: PipelineMetrics,
}

impl MetricSink {
    pub fn new(params: StoreParams) -> Arc<Self> {
        Arc::new(MetricSink {
            params,
            stores: RwLock::new(HashMap::new()),
            latest: RwLock::new(None),
            metrics: PipelineMetrics::new(),
        })
    }

    /// Samples for `name` across the given entity keys, newest-first per
    /// key. Keys without samples map to an empty sequence; there is no
    /// interpolation between entities.
    pub fn get_metric(
        &self,
        name: &str,
        keys: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BTreeMap<String, Vec<TimePoint>> {
        let stores = self
            .stores
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.iter()
            .map(|key| {
                let points = stores
                    .get(key)
                    .and_then(|by_metric| by_metric.get(name))
                    .map(|store| store.get(start, end))
                    .unwrap_or_default();
                (key.clone(), points)
            })
            .collect()
    }

    /// Names of the metrics with at least one sample for the entity,
    /// sorted.
    pub fn get_metric_names(&self, key: &str) -> Vec<String> {
        let stores = self
            .stores
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = stores
            .get(key)
            .map(|by_metric| by_metric.keys().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Average, max and configured percentiles over the committed window
    /// of one (entity, metric) store.
    pub fn get_stats(&self, key: &str, name: &str) -> Result<MetricStats, StoreError> {
        let mut stores = self
            .stores
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let store = stores
            .get_mut(key)
            .and_then(|by_metric| by_metric.get_mut(name))
            .ok_or(StoreError::Empty)?;

        let mut percentiles = Vec::with_capacity(self.params.percentiles.len());
        for &p in &self.params.percentiles {
            percentiles.push((p, store.percentile(p)?));
        }
        Ok(MetricStats {
            average: store.average()?,
            max: store.max()?,
            percentiles,
        })
    }

    /// Timestamp of the most recent successful export; staleness of the
    /// whole pipeline is observable through this value.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        *self
            .latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DataSink for MetricSink {
    fn name(&self) -> &str {
        "metric_sink"
    }

    async fn export_data(&self, batch: Arc<DataBatch>) {
        let mut stores = self
            .stores
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (key, set) in &batch.metric_sets {
            let by_metric = stores.entry(key.clone()).or_default();
            for (metric_name, &value) in &set.metric_values {
                let store = by_metric.entry(metric_name.clone()).or_insert_with(|| {
                    StatStore::new(
                        self.params.epsilon_for(metric_name),
                        self.params.resolution,
                        self.params.capacity,
                        self.params.percentiles.clone(),
                    )
                });

                let (converted, clamped) = value.to_u64_clamped();
                if clamped {
                    self.metrics.inc_negative_value_clamps();
                }
                match store.put(TimePoint {
                    timestamp: batch.timestamp,
                    value: converted,
                }) {
                    Ok(()) => {}
                    Err(StoreError::OutOfOrder) => {
                        self.metrics.inc_out_of_order_samples();
                        debug!(entity = %key, metric = %metric_name, "Out-of-order sample");
                    }
                    Err(e) => {
                        debug!(entity = %key, metric = %metric_name, error = %e, "Store rejected sample");
                    }
                }
            }
        }
        drop(stores);

        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if latest.map_or(true, |t| batch.timestamp > t) {
            *latest = Some(batch.timestamp);
        }
    }

    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MetricSet, MetricValue, METRIC_MEMORY_USAGE};
    use chrono::TimeZone;

    fn params() -> StoreParams {
        StoreParams {
            resolution: Duration::minutes(1),
            capacity: 5,
            percentiles: vec![],
            default_epsilon: 100,
            epsilon_overrides: BTreeMap::new(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap()
    }

    fn batch_with(key: &str, name: &str, value: MetricValue, at: DateTime<Utc>) -> Arc<DataBatch> {
        let mut batch = DataBatch::new(at);
        let mut set = MetricSet::default();
        set.metric_values.insert(name.to_string(), value);
        batch.metric_sets.insert(key.to_string(), set);
        Arc::new(batch)
    }

    #[tokio::test]
    async fn test_export_then_query() {
        let sink = MetricSink::new(params());
        let key = "ns:default/pod:web-0".to_string();

        sink.export_data(batch_with(
            &key,
            METRIC_MEMORY_USAGE,
            MetricValue::Int64(190),
            t0(),
        ))
        .await;
        sink.export_data(batch_with(
            &key,
            METRIC_MEMORY_USAGE,
            MetricValue::Int64(599),
            t0() + Duration::minutes(1),
        ))
        .await;

        // Only the first resolution has been committed.
        let result = sink.get_metric(METRIC_MEMORY_USAGE, &[key.clone()], None, None);
        assert_eq!(
            result[&key],
            vec![TimePoint {
                timestamp: t0(),
                value: 200,
            }]
        );

        assert_eq!(sink.get_metric_names(&key), vec![METRIC_MEMORY_USAGE]);
        assert_eq!(
            sink.latest_timestamp(),
            Some(t0() + Duration::minutes(1))
        );
    }

    #[tokio::test]
    async fn test_stats_over_committed_window() {
        let sink = MetricSink::new(StoreParams {
            percentiles: vec![0.95],
            ..params()
        });
        let key = "cluster".to_string();

        for (minute, value) in [(0, 190), (1, 120), (2, 511), (3, 50)] {
            sink.export_data(batch_with(
                &key,
                METRIC_MEMORY_USAGE,
                MetricValue::Int64(value),
                t0() + Duration::minutes(minute),
            ))
            .await;
        }

        // Committed buckets: 200, 200, 600 (minute 3 is still staged).
        let stats = sink.get_stats(&key, METRIC_MEMORY_USAGE).unwrap();
        assert_eq!(stats.average, 333);
        assert_eq!(stats.max, 511);
        assert_eq!(stats.percentiles, vec![(0.95, 600)]);

        assert_eq!(
            sink.get_stats(&key, "no/such_metric"),
            Err(StoreError::Empty)
        );
        assert_eq!(
            sink.get_stats("node:minion-9", METRIC_MEMORY_USAGE),
            Err(StoreError::Empty)
        );
    }

    #[tokio::test]
    async fn test_unknown_key_maps_to_empty_sequence() {
        let sink = MetricSink::new(params());
        let result = sink.get_metric(
            METRIC_MEMORY_USAGE,
            &["node:minion-9".to_string()],
            None,
            None,
        );
        assert!(result["node:minion-9"].is_empty());
        assert!(sink.get_metric_names("node:minion-9").is_empty());
        assert_eq!(sink.latest_timestamp(), None);
    }

    #[tokio::test]
    async fn test_negative_values_clamp_to_zero() {
        let sink = MetricSink::new(params());
        let key = "cluster".to_string();

        sink.export_data(batch_with(
            &key,
            METRIC_MEMORY_USAGE,
            MetricValue::Float(-5.0),
            t0(),
        ))
        .await;
        sink.export_data(batch_with(
            &key,
            METRIC_MEMORY_USAGE,
            MetricValue::Int64(100),
            t0() + Duration::minutes(1),
        ))
        .await;

        let result = sink.get_metric(METRIC_MEMORY_USAGE, &[key.clone()], None, None);
        assert_eq!(result[&key][0].value, 0);
    }

    #[tokio::test]
    async fn test_backdated_batch_is_counted_not_stored() {
        let sink = MetricSink::new(params());
        let key = "cluster".to_string();

        sink.export_data(batch_with(
            &key,
            METRIC_MEMORY_USAGE,
            MetricValue::Int64(100),
            t0() + Duration::minutes(1),
        ))
        .await;
        // An out-of-order batch never panics and leaves stores untouched.
        sink.export_data(batch_with(
            &key,
            METRIC_MEMORY_USAGE,
            MetricValue::Int64(900),
            t0(),
        ))
        .await;
        sink.export_data(batch_with(
            &key,
            METRIC_MEMORY_USAGE,
            MetricValue::Int64(100),
            t0() + Duration::minutes(2),
        ))
        .await;

        let result = sink.get_metric(METRIC_MEMORY_USAGE, &[key.clone()], None, None);
        assert_eq!(
            result[&key],
            vec![TimePoint {
                timestamp: t0() + Duration::minutes(1),
                value: 100,
            }]
        );
        // The rejected batch still does not regress the latest timestamp.
        assert_eq!(
            sink.latest_timestamp(),
            Some(t0() + Duration::minutes(2))
        );
    }
}
