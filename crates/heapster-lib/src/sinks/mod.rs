//! Batch consumers
//!
//! A [`DataSink`] receives the final batch of every scrape cycle. External
//! back-ends implement this trait outside the core; the in-process
//! [`MetricSink`] backs the model queries.

mod manager;
mod metric_sink;

pub use manager::{SinkManager, DEFAULT_EXPORT_DATA_TIMEOUT, DEFAULT_STOP_TIMEOUT};
pub use metric_sink::{MetricSink, MetricStats, StoreParams};

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::DataBatch;

/// Capability set of a metrics back-end.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Short name for logs and counters.
    fn name(&self) -> &str;

    /// Export one batch. The call must return only after the batch has
    /// been durably handed off, so the manager can gate the next hand-off
    /// on completion of this one.
    async fn export_data(&self, batch: Arc<DataBatch>);

    /// Idempotent release of resources.
    async fn stop(&self);
}
