//! Probe state for the aggregator
//!
//! Probes are derived from what the pipeline observably does rather than
//! from per-component bookkeeping: every successful cycle leaves its
//! timestamp in the model sink, so freshness of that timestamp is the
//! health signal. A pipeline that stops completing cycles goes stale once
//! a few resolutions pass without one and fails its liveness probe;
//! readiness additionally waits for the first completed cycle and drops
//! as soon as shutdown begins so traffic drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Resolutions that may pass without a completed cycle before the
/// pipeline counts as stale. Normal operation sits one to two behind
/// wall clock (window truncation plus the scrape offset).
const DEFAULT_STALE_CYCLES: u32 = 3;

/// What the most recent completed cycle says about the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// No cycle has completed since startup.
    Starting,
    /// The most recent cycle is within the freshness window.
    Serving,
    /// Cycles have stopped completing.
    Stale,
    /// Shutdown has begun.
    Stopping,
}

/// Rendered by the probe endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub condition: Condition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_age_secs: Option<i64>,
}

impl ProbeReport {
    /// Liveness: restarting only helps once cycles have actually stopped.
    pub fn live(&self) -> bool {
        self.condition != Condition::Stale
    }

    /// Readiness: only a fresh, non-draining pipeline takes queries.
    pub fn ready(&self) -> bool {
        self.condition == Condition::Serving
    }
}

/// Folds the last completed cycle and the shutdown flag into a probe
/// report. The only state it owns is the shutdown flag; freshness comes
/// from the caller (the model sink's latest timestamp).
pub struct PipelineHealth {
    resolution: Duration,
    stale_after: u32,
    stopping: AtomicBool,
}

impl PipelineHealth {
    pub fn new(resolution: Duration) -> Self {
        PipelineHealth {
            resolution,
            stale_after: DEFAULT_STALE_CYCLES,
            stopping: AtomicBool::new(false),
        }
    }

    /// Readiness fails from here on; liveness keeps answering so the
    /// drain is observable.
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// `last_cycle` is the model sink's latest timestamp.
    pub fn probe(&self, last_cycle: Option<DateTime<Utc>>) -> ProbeReport {
        self.probe_at(last_cycle, Utc::now())
    }

    fn probe_at(&self, last_cycle: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ProbeReport {
        let cycle_age_secs = last_cycle.map(|t| (now - t).num_seconds());
        let stale_after_secs = self.stale_after as i64 * self.resolution.as_secs() as i64;

        let condition = if self.stopping.load(Ordering::SeqCst) {
            Condition::Stopping
        } else {
            match cycle_age_secs {
                None => Condition::Starting,
                Some(age) if age > stale_after_secs => Condition::Stale,
                Some(_) => Condition::Serving,
            }
        };

        ProbeReport {
            condition,
            last_cycle,
            cycle_age_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap()
    }

    fn health() -> PipelineHealth {
        PipelineHealth::new(Duration::from_secs(30))
    }

    #[test]
    fn test_starting_is_live_but_not_ready() {
        let report = health().probe_at(None, now());
        assert_eq!(report.condition, Condition::Starting);
        assert!(report.live());
        assert!(!report.ready());
    }

    #[test]
    fn test_fresh_cycle_serves() {
        let report = health().probe_at(Some(now() - chrono::Duration::seconds(45)), now());
        assert_eq!(report.condition, Condition::Serving);
        assert!(report.live());
        assert!(report.ready());
        assert_eq!(report.cycle_age_secs, Some(45));
    }

    #[test]
    fn test_missed_cycles_go_stale() {
        // Three resolutions of 30 s may pass; 91 s is over the line.
        let report = health().probe_at(Some(now() - chrono::Duration::seconds(91)), now());
        assert_eq!(report.condition, Condition::Stale);
        assert!(!report.live());
        assert!(!report.ready());
    }

    #[test]
    fn test_shutdown_drains_readiness() {
        let health = health();
        health.begin_shutdown();

        let report = health.probe_at(Some(now() - chrono::Duration::seconds(10)), now());
        assert_eq!(report.condition, Condition::Stopping);
        assert!(report.live());
        assert!(!report.ready());
    }

    #[test]
    fn test_cycle_ahead_of_wall_clock_still_serves() {
        // Window timestamps can sit slightly ahead of the probe's clock.
        let report = health().probe_at(Some(now() + chrono::Duration::seconds(5)), now());
        assert_eq!(report.condition, Condition::Serving);
    }
}
