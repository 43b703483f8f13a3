//! The periodic scrape-cycle orchestrator
//!
//! One manager task drives ticks aligned to the metric resolution, lagged
//! by the scrape offset so node agents finish their own sampling first.
//! Per tick: scrape under the window's deadline, run the processor chain
//! in declared order, hand the result to the sink manager. Exactly one
//! cycle runs at a time; a cycle that overruns its deadline is skipped and
//! counted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::observability::PipelineMetrics;
use crate::processors::DataProcessor;
use crate::sinks::SinkManager;
use crate::sources::MetricsSource;

/// The floor below which scrape cycles would overlap agent sampling.
pub const MIN_RESOLUTION: Duration = Duration::from_secs(5);

pub const DEFAULT_RESOLUTION: Duration = Duration::from_secs(30);
pub const DEFAULT_SCRAPE_OFFSET: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("metric resolution must be at least {min:?}, got {got:?}")]
    ResolutionTooLow { min: Duration, got: Duration },

    #[error("scrape offset {offset:?} must be smaller than the resolution {resolution:?}")]
    OffsetTooLarge {
        offset: Duration,
        resolution: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Scrape cadence and window length.
    pub resolution: Duration,
    /// Lag behind wall clock before scraping a closed window.
    pub scrape_offset: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            resolution: DEFAULT_RESOLUTION,
            scrape_offset: DEFAULT_SCRAPE_OFFSET,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution < MIN_RESOLUTION {
            return Err(ConfigError::ResolutionTooLow {
                min: MIN_RESOLUTION,
                got: self.resolution,
            });
        }
        if self.scrape_offset >= self.resolution {
            return Err(ConfigError::OffsetTooLarge {
                offset: self.scrape_offset,
                resolution: self.resolution,
            });
        }
        Ok(())
    }
}

pub struct Manager {
    source: Arc<dyn MetricsSource>,
    processors: Vec<Box<dyn DataProcessor>>,
    sink_manager: Arc<SinkManager>,
    config: ManagerConfig,
    metrics: PipelineMetrics,
}

impl Manager {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        processors: Vec<Box<dyn DataProcessor>>,
        sink_manager: Arc<SinkManager>,
        config: ManagerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Manager {
            source,
            processors,
            sink_manager,
            config,
            metrics: PipelineMetrics::new(),
        })
    }

    /// Run one scrape cycle immediately.
    pub async fn tick(&self) {
        let resolution = chrono::Duration::from_std(self.config.resolution)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let offset = chrono::Duration::from_std(self.config.scrape_offset)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let now = Utc::now();
        let end = truncate_to(now - offset, resolution);
        let start = end - resolution;
        let deadline =
            tokio::time::Instant::now() + (self.config.resolution - self.config.scrape_offset);

        let scrape_started = std::time::Instant::now();
        let scraped = tokio::time::timeout_at(
            deadline,
            self.source.scrape(start, end, deadline),
        )
        .await;
        let mut batch = match scraped {
            Ok(batch) => batch,
            Err(_elapsed) => {
                self.metrics.inc_ticks_skipped();
                warn!(source = self.source.name(), "Scrape overran its window; skipping tick");
                return;
            }
        };
        self.metrics
            .observe_scrape_duration(scrape_started.elapsed().as_secs_f64());
        self.metrics
            .set_scraped_metric_sets(batch.metric_sets.len() as i64);
        debug!(
            metric_sets = batch.metric_sets.len(),
            window_end = %end,
            "Scrape cycle produced a batch"
        );

        for processor in &self.processors {
            let started = std::time::Instant::now();
            match processor.process(batch.clone()) {
                Ok(processed) => batch = processed,
                Err(e) => {
                    self.metrics.inc_processor_error(processor.name());
                    error!(
                        processor = processor.name(),
                        error = %e,
                        "Processor failed; batch passes through unchanged"
                    );
                }
            }
            self.metrics
                .observe_processor_duration(processor.name(), started.elapsed().as_secs_f64());
        }

        self.sink_manager.export(Arc::new(batch)).await;
        self.metrics.set_last_tick_timestamp(end.timestamp());
    }

    fn time_to_next_tick(&self) -> Duration {
        let resolution = chrono::Duration::from_std(self.config.resolution)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let offset = chrono::Duration::from_std(self.config.scrape_offset)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let now = Utc::now();
        let next = truncate_to(now - offset, resolution) + resolution + offset;
        (next - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Spawn the periodic loop. The returned handle stops it.
    pub fn start(self) -> ManagerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::new(self);
        let runner = manager.clone();

        let handle = tokio::spawn(async move {
            info!(
                resolution_secs = runner.config.resolution.as_secs(),
                scrape_offset_secs = runner.config.scrape_offset.as_secs(),
                "Starting scrape loop"
            );
            loop {
                let pause = runner.time_to_next_tick();
                tokio::select! {
                    _ = tokio::time::sleep(pause) => runner.tick().await,
                    _ = shutdown_rx.changed() => {
                        info!("Shutting down scrape loop");
                        break;
                    }
                }
            }
        });

        ManagerHandle {
            shutdown_tx,
            handle,
            manager,
        }
    }
}

fn truncate_to(ts: DateTime<Utc>, resolution: chrono::Duration) -> DateTime<Utc> {
    let res_ms = resolution.num_milliseconds().max(1);
    let ms = ts.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(res_ms)).unwrap_or(ts)
}

/// Handle to a running manager loop.
pub struct ManagerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    manager: Arc<Manager>,
}

impl ManagerHandle {
    /// Stop the loop, wait for any in-flight cycle to drain, then shut the
    /// sinks down.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        self.manager.sink_manager.stop().await;
    }
}
