//! Aggregator configuration

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use heapster_lib::manager::ManagerConfig;

/// Aggregator configuration, loaded from `HEAPSTER_`-prefixed environment
/// variables layered over an optional `heapster` config file.
#[derive(Debug, Clone, Deserialize)]
pub struct HeapsterConfig {
    /// Port for the health, metrics and model endpoints.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Scrape cadence in seconds. Values below 5 are rejected at startup.
    #[serde(default = "default_resolution")]
    pub resolution_secs: u64,

    /// Lag behind wall clock so node agents finish their own sampling.
    #[serde(default = "default_scrape_offset")]
    pub scrape_offset_secs: u64,

    /// Cap on concurrent node scrapes. Zero means 3 × CPU count.
    #[serde(default)]
    pub max_parallelism: usize,

    /// Port the per-node metric agent listens on.
    #[serde(default = "default_kubelet_port")]
    pub kubelet_port: u16,

    /// Per-sink batch hand-off deadline in seconds.
    #[serde(default = "default_export_data_timeout")]
    pub export_data_timeout_secs: u64,

    /// Per-sink shutdown deadline in seconds.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Number of resolutions each in-memory store retains.
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,

    /// Value quantum of the in-memory stores, absent a per-metric override.
    #[serde(default = "default_store_epsilon")]
    pub store_default_epsilon: u64,

    /// Percentiles the stores answer queries for.
    #[serde(default = "default_store_percentiles")]
    pub store_percentiles: Vec<f64>,

    /// Static node seed for the cluster cache.
    #[serde(default)]
    pub nodes: Vec<NodeSeed>,
}

/// One entry of the static node seed.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSeed {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub cpu_capacity_millicores: i64,
    #[serde(default)]
    pub cpu_allocatable_millicores: i64,
    #[serde(default)]
    pub memory_capacity_bytes: i64,
    #[serde(default)]
    pub memory_allocatable_bytes: i64,
}

fn default_api_port() -> u16 {
    8082
}

fn default_resolution() -> u64 {
    30
}

fn default_scrape_offset() -> u64 {
    5
}

fn default_kubelet_port() -> u16 {
    10255
}

fn default_export_data_timeout() -> u64 {
    20
}

fn default_stop_timeout() -> u64 {
    60
}

fn default_store_capacity() -> usize {
    30
}

fn default_store_epsilon() -> u64 {
    100
}

fn default_store_percentiles() -> Vec<f64> {
    vec![0.5, 0.95, 0.99]
}

impl HeapsterConfig {
    /// Load configuration from the optional `heapster` file and the
    /// environment, then validate the fatal invariants.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("heapster").required(false))
            .add_source(config::Environment::with_prefix("HEAPSTER"))
            .build()
            .context("Failed to read configuration")?;

        let config: HeapsterConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.manager_config()
            .validate()
            .context("Invalid scrape window configuration")?;
        if self.nodes.is_empty() {
            anyhow::bail!("no scrape source configured: the node seed list is empty");
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            resolution: Duration::from_secs(self.resolution_secs),
            scrape_offset: Duration::from_secs(self.scrape_offset_secs),
        }
    }

    pub fn effective_max_parallelism(&self) -> usize {
        if self.max_parallelism > 0 {
            self.max_parallelism
        } else {
            3 * std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn export_data_timeout(&self) -> Duration {
        Duration::from_secs(self.export_data_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
