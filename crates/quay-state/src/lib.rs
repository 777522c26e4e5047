//! quay-state — redb-backed metadata store for the quay platform.
//!
//! The `StateStore` is the single durable, authoritative source of
//! platform state:
//!
//! - App documents (identity, teams, plan, pool, env, quota, lock)
//! - Placed containers and their host assignments
//! - Pools, plans and platforms
//! - Service instances bound to apps
//! - Capped per-app log collections and deploy records
//!
//! It exposes the conditional lock update the app-lock protocol builds
//! on, and the per-host aggregation queries the scheduler consumes.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{StateStore, epoch_secs};
