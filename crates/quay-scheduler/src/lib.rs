//! quay-scheduler — pool-segregated container placement.
//!
//! Decides which container-host node receives each new container unit:
//!
//! - Restricts candidate hosts by tenant (team/pool) policy
//! - Spreads load with a stable tie-breaking rule over sorted hosts
//! - Respects per-host memory budgets for heterogeneous memory plans
//! - Picks the container to remove when scaling down
//! - Serializes concurrent placement decisions under a placement lock
//!
//! # Architecture
//!
//! ```text
//! SegregatedScheduler
//!   ├── StateStore (apps, pools, container aggregation)
//!   ├── ClusterView (nodes with pool / memory metadata)
//!   └── placement lock (atomic aggregate-and-persist)
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{CreateContainerOptions, SegregatedScheduler};
