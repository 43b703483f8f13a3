//! cAdvisor v1 wire format
//!
//! The per-host agent answers `POST /stats/container/` with a map from
//! container name to spec plus stats samples. Only the fields the metric
//! registry consumes are modelled; everything else is ignored during
//! deserialisation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::{ContainerSpec, ContainerStats, FilesystemStats};

/// Runtime labels carrying pod identity on orchestrator-managed containers.
pub const LABEL_POD_NAME: &str = "io.kubernetes.pod.name";
pub const LABEL_POD_NAMESPACE: &str = "io.kubernetes.pod.namespace";
pub const LABEL_POD_UID: &str = "io.kubernetes.pod.uid";
pub const LABEL_CONTAINER_NAME: &str = "io.kubernetes.container.name";

#[derive(Debug, Clone, Deserialize)]
pub struct WireContainerInfo {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub spec: WireContainerSpec,
    #[serde(default)]
    pub stats: Vec<WireContainerStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireContainerSpec {
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub has_cpu: bool,
    #[serde(default)]
    pub cpu: WireCpuSpec,
    #[serde(default)]
    pub has_memory: bool,
    #[serde(default)]
    pub memory: WireMemorySpec,
    #[serde(default)]
    pub has_network: bool,
    #[serde(default)]
    pub has_filesystem: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireCpuSpec {
    /// CPU limit in scheduler shares.
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMemorySpec {
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireContainerStats {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cpu: WireCpuStats,
    #[serde(default)]
    pub memory: WireMemoryStats,
    #[serde(default)]
    pub network: WireNetworkStats,
    #[serde(default)]
    pub filesystem: Vec<WireFilesystemStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireCpuStats {
    #[serde(default)]
    pub usage: WireCpuUsage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireCpuUsage {
    /// Cumulative usage in nanoseconds on all cores.
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMemoryStats {
    #[serde(default)]
    pub usage: u64,
    #[serde(default)]
    pub working_set: u64,
    #[serde(default)]
    pub container_data: WireMemoryData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMemoryData {
    #[serde(default)]
    pub pgfault: u64,
    #[serde(default)]
    pub pgmajfault: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireNetworkStats {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub rx_errors: u64,
    #[serde(default)]
    pub tx_bytes: u64,
    #[serde(default)]
    pub tx_errors: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireFilesystemStats {
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub usage: u64,
    /// The agent reports the filesystem size under `capacity`.
    #[serde(default)]
    pub capacity: u64,
}

/// One container with its static spec and most recent stats sample.
#[derive(Debug, Clone)]
pub struct Container {
    pub name: String,
    pub spec: ContainerSpec,
    pub stats: ContainerStats,
}

impl WireContainerInfo {
    /// Convert to the internal representation, keeping only the newest
    /// stats sample. Containers without any sample yield `None`.
    pub fn into_container(self) -> Option<Container> {
        let wire_stats = self.stats.into_iter().last()?;

        // Runtimes publish a friendlier identity via aliases.
        let name = self
            .aliases
            .first()
            .cloned()
            .unwrap_or(self.name);

        let spec = ContainerSpec {
            creation_time: self.spec.creation_time,
            labels: self.spec.labels,
            image: self.spec.image,
            has_cpu: self.spec.has_cpu,
            cpu_limit_shares: self.spec.cpu.limit,
            cpu_request_millicores: 0,
            has_memory: self.spec.has_memory,
            memory_limit_bytes: self.spec.memory.limit,
            memory_request_bytes: 0,
            has_network: self.spec.has_network,
            has_filesystem: self.spec.has_filesystem,
        };

        let stats = ContainerStats {
            timestamp: wire_stats.timestamp,
            cpu_usage_total_ns: wire_stats.cpu.usage.total,
            memory_usage_bytes: wire_stats.memory.usage,
            memory_working_set_bytes: wire_stats.memory.working_set,
            page_faults: wire_stats.memory.container_data.pgfault,
            major_page_faults: wire_stats.memory.container_data.pgmajfault,
            network_rx_bytes: wire_stats.network.rx_bytes,
            network_rx_errors: wire_stats.network.rx_errors,
            network_tx_bytes: wire_stats.network.tx_bytes,
            network_tx_errors: wire_stats.network.tx_errors,
            filesystems: wire_stats
                .filesystem
                .into_iter()
                .map(|fs| FilesystemStats {
                    device: fs.device,
                    usage_bytes: fs.usage,
                    limit_bytes: fs.capacity,
                })
                .collect(),
        };

        Some(Container { name, spec, stats })
    }
}
