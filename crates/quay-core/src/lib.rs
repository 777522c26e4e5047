//! quay-core — shared domain types for the quay container platform.
//!
//! Defines the application document and its satellites (plan, pool,
//! lock, quota, env vars), container units, the cluster view consumed by
//! the scheduler, and name validation.

pub mod cluster;
pub mod config;
pub mod types;
pub mod validate;

pub use cluster::{ClusterView, Node, POOL_METADATA, url_to_host};
pub use config::SchedulerConfig;
pub use types::*;
pub use validate::{valid_app_name, valid_cname};
