//! Derives rate metrics from cumulative counters
//!
//! The store and the sinks only ever see raw counters; the aggregators,
//! however, roll up `cpu/usage_rate`, which must exist before they run.
//! This processor keeps a one-batch-back snapshot of counters keyed by
//! entity and emits the rate as millicores. A changed creation time means
//! the container restarted and its counter went back to zero, so the
//! baseline resets without emitting a rate.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::core::{DataBatch, MetricValue, METRIC_CPU_USAGE, METRIC_CPU_USAGE_RATE};
use crate::processors::DataProcessor;

#[derive(Debug, Clone, Copy, PartialEq)]
struct CounterSnapshot {
    timestamp: DateTime<Utc>,
    create_time: Option<DateTime<Utc>>,
    cpu_usage_ns: i64,
}

pub struct RateCalculator {
    previous: Mutex<HashMap<String, CounterSnapshot>>,
}

impl Default for RateCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCalculator {
    pub fn new() -> Self {
        RateCalculator {
            previous: Mutex::new(HashMap::new()),
        }
    }
}

impl DataProcessor for RateCalculator {
    fn name(&self) -> &'static str {
        "rate_calculator"
    }

    fn process(&self, mut batch: DataBatch) -> Result<DataBatch> {
        let mut previous = self
            .previous
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (key, set) in batch.metric_sets.iter_mut() {
            let Some(MetricValue::Int64(current)) = set.metric_values.get(METRIC_CPU_USAGE).copied()
            else {
                continue;
            };

            if let Some(prev) = previous.get(key) {
                let elapsed_ns = (batch.timestamp - prev.timestamp)
                    .num_nanoseconds()
                    .unwrap_or(0);
                let same_incarnation = prev.create_time == set.create_time;
                if same_incarnation && elapsed_ns > 0 && current >= prev.cpu_usage_ns {
                    // nanoseconds of CPU per wall-clock nanosecond, in millicores
                    let rate = (current - prev.cpu_usage_ns) * 1000 / elapsed_ns;
                    set.metric_values
                        .insert(METRIC_CPU_USAGE_RATE.to_string(), MetricValue::Int64(rate));
                }
            }

            previous.insert(
                key.clone(),
                CounterSnapshot {
                    timestamp: batch.timestamp,
                    create_time: set.create_time,
                    cpu_usage_ns: current,
                },
            );
        }

        // Entities that disappeared keep no stale baseline.
        previous.retain(|key, _| batch.metric_sets.contains_key(key));

        Ok(batch)
    }
}
