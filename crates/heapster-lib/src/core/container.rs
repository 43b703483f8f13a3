//! Internal container spec and stats
//!
//! The scrape layer converts the agent's wire format into these types so
//! the metric registry never depends on a particular agent version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Static description of a container, valid across samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub creation_time: Option<DateTime<Utc>>,
    /// Raw labels attached by the runtime (pod name, namespace, uid live here
    /// on orchestrator-managed containers).
    pub labels: BTreeMap<String, String>,
    pub image: Option<String>,

    pub has_cpu: bool,
    /// CPU limit in scheduler shares; 1024 shares equal one core.
    pub cpu_limit_shares: u64,
    /// CPU request in millicores; zero when the orchestrator has not been
    /// consulted yet.
    pub cpu_request_millicores: i64,

    pub has_memory: bool,
    pub memory_limit_bytes: u64,
    pub memory_request_bytes: i64,

    pub has_network: bool,
    pub has_filesystem: bool,
}

/// One stats sample for a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerStats {
    pub timestamp: DateTime<Utc>,

    /// Cumulative CPU time consumed on all cores, in nanoseconds.
    pub cpu_usage_total_ns: u64,

    pub memory_usage_bytes: u64,
    pub memory_working_set_bytes: u64,
    pub page_faults: u64,
    pub major_page_faults: u64,

    pub network_rx_bytes: u64,
    pub network_rx_errors: u64,
    pub network_tx_bytes: u64,
    pub network_tx_errors: u64,

    pub filesystems: Vec<FilesystemStats>,
}

/// Per-device filesystem usage inside one stats sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilesystemStats {
    pub device: String,
    pub usage_bytes: u64,
    pub limit_bytes: u64,
}
