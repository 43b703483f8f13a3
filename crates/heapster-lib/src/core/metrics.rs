//! The closed catalogue of supported metrics
//!
//! Every metric the pipeline can produce is declared here, together with a
//! predicate telling whether a given container spec can produce it and a
//! pure accessor materialising the sample. Rate metrics derived later in
//! the pipeline (`cpu/usage_rate`) and node-level gauges stamped by
//! enrichers are declared as descriptors only.

use std::collections::BTreeMap;

use crate::core::container::{ContainerSpec, ContainerStats};
use crate::core::labels;
use crate::core::types::{LabeledMetric, MetricValue};

pub const METRIC_UPTIME: &str = "uptime";
pub const METRIC_CPU_USAGE: &str = "cpu/usage";
pub const METRIC_CPU_USAGE_RATE: &str = "cpu/usage_rate";
pub const METRIC_CPU_LIMIT: &str = "cpu/limit";
pub const METRIC_CPU_REQUEST: &str = "cpu/request";
pub const METRIC_MEMORY_USAGE: &str = "memory/usage";
pub const METRIC_MEMORY_WORKING_SET: &str = "memory/working_set";
pub const METRIC_MEMORY_LIMIT: &str = "memory/limit";
pub const METRIC_MEMORY_REQUEST: &str = "memory/request";
pub const METRIC_MEMORY_PAGE_FAULTS: &str = "memory/page_faults";
pub const METRIC_MEMORY_MAJOR_PAGE_FAULTS: &str = "memory/major_page_faults";
pub const METRIC_NETWORK_RX: &str = "network/rx";
pub const METRIC_NETWORK_RX_ERRORS: &str = "network/rx_errors";
pub const METRIC_NETWORK_TX: &str = "network/tx";
pub const METRIC_NETWORK_TX_ERRORS: &str = "network/tx_errors";
pub const METRIC_FILESYSTEM_USAGE: &str = "filesystem/usage";
pub const METRIC_FILESYSTEM_LIMIT: &str = "filesystem/limit";
pub const METRIC_CPU_NODE_CAPACITY: &str = "cpu/node_capacity";
pub const METRIC_CPU_NODE_ALLOCATABLE: &str = "cpu/node_allocatable";
pub const METRIC_MEMORY_NODE_CAPACITY: &str = "memory/node_capacity";
pub const METRIC_MEMORY_NODE_ALLOCATABLE: &str = "memory/node_allocatable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Point-in-time measurement.
    Gauge,
    /// Monotonically increasing counter; rate derivation is a downstream
    /// concern.
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int64,
    Float,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Bytes,
    Milliseconds,
    Nanoseconds,
    Count,
    Millicores,
}

/// Static description of a metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub metric_type: MetricType,
    pub value_type: ValueType,
    pub units: Units,
}

/// A metric the scrape layer can materialise directly from a container
/// sample.
pub struct SupportedMetric {
    pub descriptor: MetricDescriptor,
    /// Whether the container's static spec can produce this metric.
    pub has_value: fn(&ContainerSpec) -> bool,
    /// Materialise the sample. Only called when `has_value` returned true.
    pub get_value: fn(&ContainerSpec, &ContainerStats) -> MetricValue,
}

/// A metric whose identity needs per-sample labels, produced zero or more
/// times per container.
pub struct LabeledMetricSource {
    pub descriptor: MetricDescriptor,
    pub has_value: fn(&ContainerSpec) -> bool,
    pub get_values: fn(&ContainerSpec, &ContainerStats) -> Vec<LabeledMetric>,
}

fn uptime_millis(spec: &ContainerSpec, stats: &ContainerStats) -> MetricValue {
    let created = spec.creation_time.unwrap_or(stats.timestamp);
    MetricValue::Int64((stats.timestamp - created).num_milliseconds())
}

/// The closed set of directly scraped metrics.
pub static SUPPORTED_METRICS: &[SupportedMetric] = &[
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_UPTIME,
            description: "Number of milliseconds since the container was started",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Milliseconds,
        },
        has_value: |spec| spec.creation_time.is_some(),
        get_value: uptime_millis,
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_CPU_USAGE,
            description: "Cumulative CPU usage on all cores",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Nanoseconds,
        },
        has_value: |spec| spec.has_cpu,
        get_value: |_spec, stats| MetricValue::Int64(stats.cpu_usage_total_ns as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_CPU_LIMIT,
            description: "CPU hard limit in millicores",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Millicores,
        },
        has_value: |spec| spec.has_cpu && spec.cpu_limit_shares > 0,
        // Shares use a conversion factor of 1024 per core; normalize to 1000.
        get_value: |spec, _stats| {
            MetricValue::Int64((spec.cpu_limit_shares as i64 * 1000) / 1024)
        },
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_CPU_REQUEST,
            description: "CPU request (the guaranteed amount of resources) in millicores",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Millicores,
        },
        has_value: |spec| spec.cpu_request_millicores > 0,
        get_value: |spec, _stats| MetricValue::Int64(spec.cpu_request_millicores),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_MEMORY_USAGE,
            description: "Total memory usage",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.has_memory,
        get_value: |_spec, stats| MetricValue::Int64(stats.memory_usage_bytes as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_MEMORY_WORKING_SET,
            description: "Total working set usage; memory in use and not easily dropped",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.has_memory,
        get_value: |_spec, stats| MetricValue::Int64(stats.memory_working_set_bytes as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_MEMORY_LIMIT,
            description: "Memory hard limit in bytes",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.has_memory && spec.memory_limit_bytes > 0,
        get_value: |spec, _stats| MetricValue::Int64(spec.memory_limit_bytes as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_MEMORY_REQUEST,
            description: "Memory request (the guaranteed amount of resources) in bytes",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.memory_request_bytes > 0,
        get_value: |spec, _stats| MetricValue::Int64(spec.memory_request_bytes),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_MEMORY_PAGE_FAULTS,
            description: "Number of page faults",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Count,
        },
        has_value: |spec| spec.has_memory,
        get_value: |_spec, stats| MetricValue::Int64(stats.page_faults as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_MEMORY_MAJOR_PAGE_FAULTS,
            description: "Number of major page faults",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Count,
        },
        has_value: |spec| spec.has_memory,
        get_value: |_spec, stats| MetricValue::Int64(stats.major_page_faults as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_NETWORK_RX,
            description: "Cumulative number of bytes received over the network",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.has_network,
        get_value: |_spec, stats| MetricValue::Int64(stats.network_rx_bytes as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_NETWORK_RX_ERRORS,
            description: "Cumulative number of errors while receiving over the network",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Count,
        },
        has_value: |spec| spec.has_network,
        get_value: |_spec, stats| MetricValue::Int64(stats.network_rx_errors as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_NETWORK_TX,
            description: "Cumulative number of bytes sent over the network",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.has_network,
        get_value: |_spec, stats| MetricValue::Int64(stats.network_tx_bytes as i64),
    },
    SupportedMetric {
        descriptor: MetricDescriptor {
            name: METRIC_NETWORK_TX_ERRORS,
            description: "Cumulative number of errors while sending over the network",
            metric_type: MetricType::Cumulative,
            value_type: ValueType::Int64,
            units: Units::Count,
        },
        has_value: |spec| spec.has_network,
        get_value: |_spec, stats| MetricValue::Int64(stats.network_tx_errors as i64),
    },
];

fn filesystem_points(
    stats: &ContainerStats,
    name: &str,
    value_of: fn(&crate::core::container::FilesystemStats) -> u64,
) -> Vec<LabeledMetric> {
    stats
        .filesystems
        .iter()
        .map(|fs| {
            let mut fs_labels = BTreeMap::new();
            fs_labels.insert(labels::RESOURCE_ID.to_string(), fs.device.clone());
            LabeledMetric {
                name: name.to_string(),
                labels: fs_labels,
                value: MetricValue::Int64(value_of(fs) as i64),
            }
        })
        .collect()
}

/// Metrics that repeat per device.
pub static SUPPORTED_LABELED_METRICS: &[LabeledMetricSource] = &[
    LabeledMetricSource {
        descriptor: MetricDescriptor {
            name: METRIC_FILESYSTEM_USAGE,
            description: "Total number of bytes consumed on a filesystem",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.has_filesystem,
        get_values: |_spec, stats| {
            filesystem_points(stats, METRIC_FILESYSTEM_USAGE, |fs| fs.usage_bytes)
        },
    },
    LabeledMetricSource {
        descriptor: MetricDescriptor {
            name: METRIC_FILESYSTEM_LIMIT,
            description: "The total size of a filesystem in bytes",
            metric_type: MetricType::Gauge,
            value_type: ValueType::Int64,
            units: Units::Bytes,
        },
        has_value: |spec| spec.has_filesystem,
        get_values: |_spec, stats| {
            filesystem_points(stats, METRIC_FILESYSTEM_LIMIT, |fs| fs.limit_bytes)
        },
    },
];
