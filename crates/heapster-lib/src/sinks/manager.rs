//! Concurrent fan-out to sinks with per-sink isolation
//!
//! Each sink gets a holder: a single-slot offer channel, a stop channel
//! and a dedicated task that receives a batch and calls the sink
//! synchronously. A sink still busy with the previous batch at the
//! hand-off deadline loses the new batch; other sinks are unaffected, and
//! a slow sink never delays the next scrape cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::core::DataBatch;
use crate::observability::PipelineMetrics;
use crate::sinks::DataSink;

pub const DEFAULT_EXPORT_DATA_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(60);

struct SinkHolder {
    name: String,
    batch_tx: mpsc::Sender<Arc<DataBatch>>,
    stop_tx: mpsc::Sender<()>,
    /// Guaranteed holders are offered the batch without a deadline; the
    /// in-process sink must observe every batch the manager emits.
    guaranteed: bool,
}

/// Owns one holder per sink and distributes each batch to all of them.
pub struct SinkManager {
    holders: Vec<SinkHolder>,
    export_data_timeout: Duration,
    stop_timeout: Duration,
    workers: Mutex<Vec<(String, JoinHandle<()>)>>,
    metrics: PipelineMetrics,
}

impl SinkManager {
    /// `sinks` are offered each batch under the export deadline;
    /// `guaranteed_sinks` always receive every batch.
    pub fn new(
        sinks: Vec<Arc<dyn DataSink>>,
        guaranteed_sinks: Vec<Arc<dyn DataSink>>,
        export_data_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        let mut holders = Vec::new();
        let mut workers = Vec::new();

        let all = sinks
            .into_iter()
            .map(|s| (s, false))
            .chain(guaranteed_sinks.into_iter().map(|s| (s, true)));

        for (sink, guaranteed) in all {
            let name = sink.name().to_string();
            let (batch_tx, mut batch_rx) = mpsc::channel::<Arc<DataBatch>>(1);
            let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

            let worker_name = name.clone();
            let worker = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe_batch = batch_rx.recv() => match maybe_batch {
                            Some(batch) => sink.export_data(batch).await,
                            None => break,
                        },
                        _ = stop_rx.recv() => {
                            debug!(sink = %worker_name, "Stop received");
                            sink.stop().await;
                            break;
                        }
                    }
                }
            });

            holders.push(SinkHolder {
                name: name.clone(),
                batch_tx,
                stop_tx,
                guaranteed,
            });
            workers.push((name, worker));
        }

        SinkManager {
            holders,
            export_data_timeout,
            stop_timeout,
            workers: Mutex::new(workers),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Offer the batch to every holder, returning once each has either
    /// accepted it or run into the hand-off deadline.
    pub async fn export(&self, batch: Arc<DataBatch>) {
        let mut offers = JoinSet::new();
        for holder in &self.holders {
            let batch = batch.clone();
            let batch_tx = holder.batch_tx.clone();
            let name = holder.name.clone();
            let guaranteed = holder.guaranteed;
            let timeout = self.export_data_timeout;
            let metrics = self.metrics.clone();

            offers.spawn(async move {
                debug!(sink = %name, "Pushing batch");
                let delivered = if guaranteed {
                    batch_tx.send(batch).await.is_ok()
                } else {
                    matches!(
                        tokio::time::timeout(timeout, batch_tx.send(batch)).await,
                        Ok(Ok(()))
                    )
                };
                if delivered {
                    metrics.inc_sink_exported_batches(&name);
                } else {
                    metrics.inc_sink_export_timeouts(&name);
                    warn!(sink = %name, "Failed to push batch; dropping for this sink");
                }
            });
        }
        while offers.join_next().await.is_some() {}
    }

    /// Stop every holder in parallel. A holder that has not wound down
    /// within the stop deadline is abandoned.
    pub async fn stop(&self) {
        for holder in &self.holders {
            // The slot is never contended: any stop signal is terminal.
            let _ = holder.stop_tx.try_send(());
        }

        let workers = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };

        let mut waits = JoinSet::new();
        for (name, worker) in workers {
            let timeout = self.stop_timeout;
            waits.spawn(async move {
                match tokio::time::timeout(timeout, worker).await {
                    Ok(_) => debug!(sink = %name, "Sink stopped"),
                    Err(_) => warn!(sink = %name, "Sink ignored stop; abandoning"),
                }
            });
        }
        while waits.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct RecordingSink {
        sink_name: String,
        delay: Duration,
        received: AtomicUsize,
        stopped: AtomicBool,
    }

    impl RecordingSink {
        fn new(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(RecordingSink {
                sink_name: name.to_string(),
                delay,
                received: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl DataSink for RecordingSink {
        fn name(&self) -> &str {
            &self.sink_name
        }

        async fn export_data(&self, _batch: Arc<DataBatch>) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        async fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn batch() -> Arc<DataBatch> {
        Arc::new(DataBatch::new(
            Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_all_sinks_receive_batches() {
        let a = RecordingSink::new("a", Duration::ZERO);
        let b = RecordingSink::new("b", Duration::ZERO);
        let manager = SinkManager::new(
            vec![a.clone(), b.clone()],
            vec![],
            DEFAULT_EXPORT_DATA_TIMEOUT,
            DEFAULT_STOP_TIMEOUT,
        );

        for _ in 0..3 {
            manager.export(batch()).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(a.received.load(Ordering::SeqCst), 3);
        assert_eq!(b.received.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_sink_drops_batches_without_blocking_others() {
        let slow = RecordingSink::new("slow", Duration::from_millis(300));
        let fast = RecordingSink::new("fast", Duration::ZERO);
        let manager = SinkManager::new(
            vec![slow.clone(), fast.clone()],
            vec![],
            Duration::from_millis(50),
            DEFAULT_STOP_TIMEOUT,
        );

        for _ in 0..4 {
            manager.export(batch()).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // The fast sink saw every batch; the slow one is still working
        // through its first and lost the late offers.
        assert_eq!(fast.received.load(Ordering::SeqCst), 4);
        assert!(slow.received.load(Ordering::SeqCst) <= 1);

        // Let the slow sink drain: its slot held at most one more batch.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(slow.received.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_guaranteed_sink_sees_every_batch() {
        let busy = RecordingSink::new("busy", Duration::from_millis(100));
        let guaranteed = RecordingSink::new("model", Duration::from_millis(10));
        let manager = SinkManager::new(
            vec![busy.clone()],
            vec![guaranteed.clone()],
            Duration::from_millis(20),
            DEFAULT_STOP_TIMEOUT,
        );

        for _ in 0..5 {
            manager.export(batch()).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(guaranteed.received.load(Ordering::SeqCst), 5);
        assert!(busy.received.load(Ordering::SeqCst) < 5);
    }

    #[tokio::test]
    async fn test_stop_reaches_every_sink() {
        let a = RecordingSink::new("a", Duration::ZERO);
        let b = RecordingSink::new("b", Duration::ZERO);
        let manager = SinkManager::new(
            vec![a.clone(), b.clone()],
            vec![],
            DEFAULT_EXPORT_DATA_TIMEOUT,
            Duration::from_millis(500),
        );

        manager.export(batch()).await;
        manager.stop().await;

        assert!(a.stopped.load(Ordering::SeqCst));
        assert!(b.stopped.load(Ordering::SeqCst));
    }
}
