//! Background population of the cluster cache
//!
//! Scrape and enrichment tasks only ever read the cache; this module owns
//! the write side. A [`ClusterInfoSource`] abstracts the orchestrator
//! client (a live API client or a pre-populated fixture); the refresher
//! replaces the cache contents on an interval, dropping entities the
//! orchestrator no longer reports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::{ClusterCache, NamespaceInfo, NodeInfo, PodInfo};

/// Capability set of the orchestrator client.
#[async_trait]
pub trait ClusterInfoSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
    async fn list_pods(&self) -> Result<Vec<PodInfo>>;
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>>;
}

/// Periodically mirrors the orchestrator's view into a [`ClusterCache`].
pub struct CacheRefresher {
    cache: Arc<ClusterCache>,
    source: Arc<dyn ClusterInfoSource>,
    interval: Duration,
}

impl CacheRefresher {
    pub fn new(
        cache: Arc<ClusterCache>,
        source: Arc<dyn ClusterInfoSource>,
        interval: Duration,
    ) -> Self {
        CacheRefresher {
            cache,
            source,
            interval,
        }
    }

    /// One full refresh. A failed listing leaves that entity class at its
    /// previous contents; the other classes still refresh.
    pub async fn refresh_once(&self) {
        match self.source.list_nodes().await {
            Ok(nodes) => self.cache.replace_nodes(nodes),
            Err(e) => warn!(error = %e, "Failed to list nodes; keeping cached set"),
        }
        match self.source.list_pods().await {
            Ok(pods) => self.cache.replace_pods(pods),
            Err(e) => warn!(error = %e, "Failed to list pods; keeping cached set"),
        }
        match self.source.list_namespaces().await {
            Ok(namespaces) => self.cache.replace_namespaces(namespaces),
            Err(e) => warn!(error = %e, "Failed to list namespaces; keeping cached set"),
        }
        debug!(nodes = self.cache.node_count(), "Cluster cache refreshed");
    }

    /// Spawn the refresh loop. An initial refresh runs immediately.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                "Starting cluster cache refresh loop"
            );
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.refresh_once().await,
                    _ = shutdown.changed() => {
                        info!("Shutting down cluster cache refresh loop");
                        break;
                    }
                }
            }
        })
    }
}
