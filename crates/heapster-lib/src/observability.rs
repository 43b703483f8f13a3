//! Pipeline observability
//!
//! Prometheus metrics covering every pipeline stage. Per-tick work is
//! best-effort, so failures surface here as monotonically increasing
//! counters rather than aborted cycles.

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for stage latencies (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once).
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    scrape_errors: IntCounterVec,
    scrape_duration_seconds: Histogram,
    scraped_metric_sets: IntGauge,
    processor_duration_seconds: HistogramVec,
    processor_errors: IntCounterVec,
    missing_metadata: IntCounterVec,
    out_of_order_samples: IntCounter,
    negative_value_clamps: IntCounter,
    sink_exported_batches: IntCounterVec,
    sink_export_timeouts: IntCounterVec,
    ticks_skipped: IntCounter,
    last_tick_timestamp_seconds: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            scrape_errors: register_int_counter_vec!(
                "heapster_scrape_errors_total",
                "Number of failed node scrapes",
                &["node"]
            )
            .expect("Failed to register scrape_errors_total"),

            scrape_duration_seconds: register_histogram!(
                "heapster_scrape_duration_seconds",
                "Wall-clock time of one full scrape cycle",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register scrape_duration_seconds"),

            scraped_metric_sets: register_int_gauge!(
                "heapster_scraped_metric_sets",
                "Number of metric sets produced by the most recent scrape"
            )
            .expect("Failed to register scraped_metric_sets"),

            processor_duration_seconds: register_histogram_vec!(
                "heapster_processor_duration_seconds",
                "Time spent in each batch processor",
                &["processor"],
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register processor_duration_seconds"),

            processor_errors: register_int_counter_vec!(
                "heapster_processor_errors_total",
                "Number of batch processor failures",
                &["processor"]
            )
            .expect("Failed to register processor_errors_total"),

            missing_metadata: register_int_counter_vec!(
                "heapster_missing_metadata_total",
                "Entities skipped by a processor because orchestrator metadata was missing",
                &["processor"]
            )
            .expect("Failed to register missing_metadata_total"),

            out_of_order_samples: register_int_counter!(
                "heapster_out_of_order_samples_total",
                "Samples rejected by the in-memory store for arriving out of order"
            )
            .expect("Failed to register out_of_order_samples_total"),

            negative_value_clamps: register_int_counter!(
                "heapster_negative_value_clamps_total",
                "Negative sample values clamped to zero before storage"
            )
            .expect("Failed to register negative_value_clamps_total"),

            sink_exported_batches: register_int_counter_vec!(
                "heapster_sink_exported_batches_total",
                "Batches handed off to each sink",
                &["sink"]
            )
            .expect("Failed to register sink_exported_batches_total"),

            sink_export_timeouts: register_int_counter_vec!(
                "heapster_sink_export_timeouts_total",
                "Batches dropped because a sink was still busy at the hand-off deadline",
                &["sink"]
            )
            .expect("Failed to register sink_export_timeouts_total"),

            ticks_skipped: register_int_counter!(
                "heapster_ticks_skipped_total",
                "Scrape cycles skipped because the previous one overran its window"
            )
            .expect("Failed to register ticks_skipped_total"),

            last_tick_timestamp_seconds: register_int_gauge!(
                "heapster_last_tick_timestamp_seconds",
                "Unix timestamp of the most recent completed scrape cycle"
            )
            .expect("Failed to register last_tick_timestamp_seconds"),
        }
    }
}

/// Lightweight handle to the global pipeline metrics.
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static PipelineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_scrape_error(&self, node: &str) {
        self.inner().scrape_errors.with_label_values(&[node]).inc();
    }

    pub fn observe_scrape_duration(&self, duration_secs: f64) {
        self.inner().scrape_duration_seconds.observe(duration_secs);
    }

    pub fn set_scraped_metric_sets(&self, count: i64) {
        self.inner().scraped_metric_sets.set(count);
    }

    pub fn observe_processor_duration(&self, processor: &str, duration_secs: f64) {
        self.inner()
            .processor_duration_seconds
            .with_label_values(&[processor])
            .observe(duration_secs);
    }

    pub fn inc_processor_error(&self, processor: &str) {
        self.inner()
            .processor_errors
            .with_label_values(&[processor])
            .inc();
    }

    pub fn inc_missing_metadata(&self, processor: &str) {
        self.inner()
            .missing_metadata
            .with_label_values(&[processor])
            .inc();
    }

    pub fn inc_out_of_order_samples(&self) {
        self.inner().out_of_order_samples.inc();
    }

    pub fn inc_negative_value_clamps(&self) {
        self.inner().negative_value_clamps.inc();
    }

    pub fn inc_sink_exported_batches(&self, sink: &str) {
        self.inner()
            .sink_exported_batches
            .with_label_values(&[sink])
            .inc();
    }

    pub fn inc_sink_export_timeouts(&self, sink: &str) {
        self.inner()
            .sink_export_timeouts
            .with_label_values(&[sink])
            .inc();
    }

    pub fn inc_ticks_skipped(&self) {
        self.inner().ticks_skipped.inc();
    }

    pub fn set_last_tick_timestamp(&self, unix_secs: i64) {
        self.inner().last_tick_timestamp_seconds.set(unix_secs);
    }
}
