//! Core data model shared by every pipeline stage
//!
//! A scrape cycle produces a [`DataBatch`]: one [`MetricSet`] per entity,
//! keyed by a canonical entity-key string. Processors consume a batch and
//! return a new one; sinks consume the final batch of the cycle.

mod container;
mod keys;
pub mod labels;
mod metrics;
mod types;

pub use container::{ContainerSpec, ContainerStats, FilesystemStats};
pub use keys::{
    cluster_key, namespace_key, node_container_key, node_key, pod_container_key, pod_key,
};
pub use labels::MetricSetType;
pub use metrics::{
    LabeledMetricSource, MetricDescriptor, MetricType, SupportedMetric, Units, ValueType,
    SUPPORTED_LABELED_METRICS, SUPPORTED_METRICS,
};
pub use metrics::{
    METRIC_CPU_LIMIT, METRIC_CPU_NODE_ALLOCATABLE, METRIC_CPU_NODE_CAPACITY, METRIC_CPU_REQUEST,
    METRIC_CPU_USAGE, METRIC_CPU_USAGE_RATE, METRIC_FILESYSTEM_LIMIT, METRIC_FILESYSTEM_USAGE,
    METRIC_MEMORY_LIMIT, METRIC_MEMORY_MAJOR_PAGE_FAULTS, METRIC_MEMORY_NODE_ALLOCATABLE,
    METRIC_MEMORY_NODE_CAPACITY, METRIC_MEMORY_PAGE_FAULTS, METRIC_MEMORY_REQUEST,
    METRIC_MEMORY_USAGE, METRIC_MEMORY_WORKING_SET, METRIC_NETWORK_RX, METRIC_NETWORK_RX_ERRORS,
    METRIC_NETWORK_TX, METRIC_NETWORK_TX_ERRORS, METRIC_UPTIME,
};
pub use types::{DataBatch, LabeledMetric, MetricSet, MetricValue};
