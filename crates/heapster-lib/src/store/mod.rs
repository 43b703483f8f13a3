//! Bounded in-memory time-series storage

mod stat_store;

pub use stat_store::{StatStore, StoreError, TimePoint};
