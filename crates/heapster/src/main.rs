//! Heapster - cluster-wide metrics aggregator
//!
//! Scrapes every node's metric agent each resolution, enriches the samples
//! with orchestrator metadata, rolls them up the entity hierarchy and fans
//! the result out to the configured sinks. The in-process metric sink
//! backs the model endpoints served here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use heapster_lib::health::PipelineHealth;
use heapster_lib::manager::Manager;
use heapster_lib::observability::PipelineMetrics;
use heapster_lib::orchestrator::{ClusterCache, NodeInfo};
use heapster_lib::processors::{
    default_metrics_to_aggregate, ClusterAggregator, DataProcessor, NamespaceAggregator,
    NamespaceBasedEnricher, NodeAggregator, NodeAutoscalingEnricher, PodAggregator,
    PodBasedEnricher, RateCalculator,
};
use heapster_lib::sinks::{DataSink, MetricSink, SinkManager, StoreParams};
use heapster_lib::sources::kubelet::KubeletClient;
use heapster_lib::sources::KubeletProvider;

mod api;
mod config;

const HEAPSTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = HEAPSTER_VERSION, "Starting heapster");

    let config = config::HeapsterConfig::load()?;
    info!(
        resolution_secs = config.resolution_secs,
        nodes = config.nodes.len(),
        "Aggregator configured"
    );

    // Metrics registry must exist before any component hands out counters.
    let _metrics = PipelineMetrics::new();

    // Probes answer from cycle freshness, so readiness turns green with
    // the first completed scrape cycle and red once cycles stop.
    let health = Arc::new(PipelineHealth::new(Duration::from_secs(
        config.resolution_secs,
    )));

    // Cluster cache, seeded from configuration. A live orchestrator watch
    // can feed the same cache without touching the pipeline.
    let cache = Arc::new(ClusterCache::new());
    for seed in &config.nodes {
        cache.upsert_node(NodeInfo {
            name: seed.name.clone(),
            address: seed.address.clone(),
            host_id: seed.host_id.clone(),
            cpu_capacity_millicores: seed.cpu_capacity_millicores,
            cpu_allocatable_millicores: seed.cpu_allocatable_millicores,
            memory_capacity_bytes: seed.memory_capacity_bytes,
            memory_allocatable_bytes: seed.memory_allocatable_bytes,
        });
    }

    // Source
    let client = KubeletClient::new(Duration::from_secs(config.resolution_secs))
        .context("Failed to build kubelet client")?;
    let provider = Arc::new(KubeletProvider::new(
        cache.clone(),
        client,
        config.kubelet_port,
        config.effective_max_parallelism(),
    ));

    // Sinks: the in-process model sink sees every batch; external sinks
    // register here with the plain export contract.
    let metric_sink = MetricSink::new(StoreParams {
        resolution: chrono::Duration::seconds(config.resolution_secs as i64),
        capacity: config.store_capacity,
        percentiles: config.store_percentiles.clone(),
        default_epsilon: config.store_default_epsilon,
        ..StoreParams::default()
    });
    let external_sinks: Vec<Arc<dyn DataSink>> = Vec::new();
    let sink_manager = Arc::new(SinkManager::new(
        external_sinks,
        vec![metric_sink.clone()],
        config.export_data_timeout(),
        config.stop_timeout(),
    ));

    // Processors: enrichers, then the rate derivation the aggregators need,
    // then the roll-ups bottom-up, then node gauges.
    let metrics_to_aggregate = default_metrics_to_aggregate();
    let processors: Vec<Box<dyn DataProcessor>> = vec![
        Box::new(PodBasedEnricher::new(cache.clone())),
        Box::new(NamespaceBasedEnricher::new(cache.clone())),
        Box::new(RateCalculator::new()),
        Box::new(PodAggregator::new(metrics_to_aggregate.clone())),
        Box::new(NamespaceAggregator::new(metrics_to_aggregate.clone())),
        Box::new(NodeAggregator::new(metrics_to_aggregate.clone())),
        Box::new(ClusterAggregator::new(metrics_to_aggregate)),
        Box::new(NodeAutoscalingEnricher::new(cache.clone())),
    ];

    let manager = Manager::new(
        provider,
        processors,
        sink_manager,
        config.manager_config(),
    )
    .context("Failed to build the scrape manager")?;
    let manager_handle = manager.start();

    let app_state = Arc::new(api::AppState {
        health: health.clone(),
        sink: metric_sink,
    });
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    health.begin_shutdown();
    manager_handle.stop().await;
    api_handle.abort();

    Ok(())
}
