//! Quantised, bucketed ring of samples for one (entity, metric) pair
//!
//! Values are quantised by `epsilon`: the bucket of a value `v` is the
//! smallest multiple of `epsilon` that is ≥ `v`. Timestamps are truncated
//! to `resolution`. Samples arriving within the currently open resolution
//! accumulate in a staging slot; a sample from a later resolution commits
//! the staged slot to the ring, lazily filling any skipped resolutions with
//! a copy of the last committed slot. Queries are defined over committed
//! slots only, never over the staging slot.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors surfaced by [`StatStore`] operations.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    /// The sample's resolution is older than the currently open one.
    #[error("sample predates the open resolution")]
    OutOfOrder,

    /// No committed samples are available yet.
    #[error("no committed samples")]
    Empty,

    /// The requested percentile is not in the configured set.
    #[error("unsupported percentile: {0}")]
    UnsupportedPercentile(f64),
}

/// The sample unit stored in a [`StatStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePoint {
    pub timestamp: DateTime<Utc>,
    pub value: u64,
}

/// One committed resolution.
#[derive(Debug, Clone, Copy)]
struct Slot {
    timestamp: DateTime<Utc>,
    /// Bucketed average of the values observed during the resolution.
    value: u64,
    /// Raw maximum observed during the resolution.
    max: u64,
}

/// The staging slot for the currently open resolution.
#[derive(Debug, Clone, Copy)]
struct OpenSlot {
    timestamp: DateTime<Utc>,
    sum: u64,
    count: u64,
    max: u64,
}

impl OpenSlot {
    fn new(timestamp: DateTime<Utc>, value: u64) -> Self {
        OpenSlot {
            timestamp,
            sum: value,
            count: 1,
            max: value,
        }
    }

    fn merge(&mut self, value: u64) {
        self.sum += value;
        self.count += 1;
        self.max = self.max.max(value);
    }
}

/// Memoised aggregates over the committed slots. Invalidated on commit and
/// rewind.
#[derive(Debug, Clone)]
struct Aggregates {
    max: u64,
    average: u64,
    percentiles: Vec<(f64, u64)>,
}

/// Bounded, lossy but well-defined time series for a single (entity,
/// metric) pair.
pub struct StatStore {
    epsilon: u64,
    resolution: Duration,
    capacity: usize,
    percentiles: Vec<f64>,

    slots: VecDeque<Slot>,
    last_put: Option<OpenSlot>,
    aggregates: Option<Aggregates>,
}

impl StatStore {
    /// `epsilon` is the value quantum, `resolution` the temporal quantum,
    /// `capacity` the number of retained resolutions, `percentiles` the
    /// closed set of supported percentile queries.
    pub fn new(
        epsilon: u64,
        resolution: Duration,
        capacity: usize,
        percentiles: Vec<f64>,
    ) -> Self {
        StatStore {
            epsilon: epsilon.max(1),
            resolution,
            capacity: capacity.max(1),
            percentiles,
            slots: VecDeque::with_capacity(capacity.max(1)),
            last_put: None,
            aggregates: None,
        }
    }

    /// Smallest multiple of epsilon ≥ v.
    fn bucket(&self, v: u64) -> u64 {
        v.div_ceil(self.epsilon) * self.epsilon
    }

    fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let res_ms = self.resolution.num_milliseconds().max(1);
        let ms = ts.timestamp_millis();
        DateTime::from_timestamp_millis(ms - ms.rem_euclid(res_ms)).unwrap_or(ts)
    }

    /// Record a sample. Samples older than the open resolution are
    /// rejected; samples within it are merged; a later sample commits the
    /// open resolution and any skipped gap.
    pub fn put(&mut self, point: TimePoint) -> Result<(), StoreError> {
        let ts = self.truncate(point.timestamp);
        match self.last_put {
            None => {
                self.last_put = Some(OpenSlot::new(ts, point.value));
                Ok(())
            }
            Some(ref mut open) if ts == open.timestamp => {
                open.merge(point.value);
                Ok(())
            }
            Some(open) if ts < open.timestamp => Err(StoreError::OutOfOrder),
            Some(open) => {
                let committed = Slot {
                    timestamp: open.timestamp,
                    value: self.bucket(open.sum / open.count),
                    max: open.max,
                };
                self.commit(committed);

                // Skipped resolutions inherit the last committed slot.
                let mut gap = open.timestamp + self.resolution;
                while gap < ts {
                    self.commit(Slot {
                        timestamp: gap,
                        ..committed
                    });
                    gap += self.resolution;
                }

                self.last_put = Some(OpenSlot::new(ts, point.value));
                Ok(())
            }
        }
    }

    fn commit(&mut self, slot: Slot) {
        if self.slots.len() == self.capacity {
            // Rewind: overwrite the oldest resolution.
            self.slots.pop_front();
        }
        self.slots.push_back(slot);
        self.aggregates = None;
    }

    /// The most recently committed sample.
    pub fn last(&self) -> Result<TimePoint, StoreError> {
        self.slots
            .back()
            .map(|s| TimePoint {
                timestamp: s.timestamp,
                value: s.value,
            })
            .ok_or(StoreError::Empty)
    }

    /// Maximum raw value across committed resolutions.
    pub fn max(&mut self) -> Result<u64, StoreError> {
        Ok(self.compute_aggregates()?.max)
    }

    /// Integer mean of the committed buckets.
    pub fn average(&mut self) -> Result<u64, StoreError> {
        Ok(self.compute_aggregates()?.average)
    }

    /// Nearest-rank percentile over the committed buckets; `p` must belong
    /// to the configured percentile set. `p = 0` clamps to the minimum
    /// bucket and `p = 1` to the maximum.
    pub fn percentile(&mut self, p: f64) -> Result<u64, StoreError> {
        if !self.percentiles.iter().any(|&q| q == p) {
            return Err(StoreError::UnsupportedPercentile(p));
        }
        let aggregates = self.compute_aggregates()?;
        aggregates
            .percentiles
            .iter()
            .find(|&&(q, _)| q == p)
            .map(|&(_, v)| v)
            .ok_or(StoreError::UnsupportedPercentile(p))
    }

    /// Committed samples newest-first. A sample whose timestamp equals
    /// `start` is excluded; `end` is inclusive. Unset bounds are unbounded.
    pub fn get(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<TimePoint> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Vec::new();
            }
        }
        self.slots
            .iter()
            .rev()
            .filter(|slot| start.map_or(true, |s| slot.timestamp > s))
            .filter(|slot| end.map_or(true, |e| slot.timestamp <= e))
            .map(|slot| TimePoint {
                timestamp: slot.timestamp,
                value: slot.value,
            })
            .collect()
    }

    /// True when no resolution has been committed yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn compute_aggregates(&mut self) -> Result<&Aggregates, StoreError> {
        if self.slots.is_empty() {
            return Err(StoreError::Empty);
        }
        if self.aggregates.is_none() {
            let max = self.slots.iter().map(|s| s.max).max().unwrap_or(0);
            let sum: u64 = self.slots.iter().map(|s| s.value).sum();
            let average = sum / self.slots.len() as u64;

            let mut sorted: Vec<u64> = self.slots.iter().map(|s| s.value).collect();
            sorted.sort_unstable();
            let n = sorted.len();
            let percentiles = self
                .percentiles
                .iter()
                .map(|&p| {
                    let rank = ((p * n as f64).ceil() as usize).clamp(1, n);
                    (p, sorted[rank - 1])
                })
                .collect();

            self.aggregates = Some(Aggregates {
                max,
                average,
                percentiles,
            });
        }
        Ok(self.aggregates.as_ref().expect("aggregates just computed"))
    }
}
