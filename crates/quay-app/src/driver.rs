//! Container driver interface.
//!
//! The driver realizes containers on container-host nodes: it is the
//! external component that starts, stops and destroys the actual
//! workloads. The platform consumes it through this trait; the driver's
//! own implementation (Docker, LXC, ...) lives outside this codebase.
//!
//! CNAME management is an optional capability: drivers that can publish
//! CNAMEs themselves advertise it through [`ContainerDriver::cname_manager`],
//! and callers branch on presence.

use std::collections::HashMap;

use thiserror::Error;

use quay_core::types::{App, Unit, UnitStatus};

/// Result type alias for driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors surfaced by the container driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unit not found")]
    UnitNotFound,

    #[error("driver error: {0}")]
    Failed(String),
}

/// The container driver consumed by the lifecycle coordinator.
pub trait ContainerDriver: Send + Sync {
    /// All units of the app.
    fn units(&self, app: &App) -> DriverResult<Vec<Unit>>;

    /// Units that should receive routed traffic.
    fn routable_units(&self, app: &App) -> DriverResult<Vec<Unit>>;

    /// Destroy every container of the app.
    fn destroy(&self, app: &App) -> DriverResult<()>;

    /// Restart the app's process (all processes when empty).
    fn restart(&self, app: &App, process: &str) -> DriverResult<()>;

    /// Stop the app's process (all processes when empty).
    fn stop(&self, app: &App, process: &str) -> DriverResult<()>;

    /// Start the app's process (all processes when empty).
    fn start(&self, app: &App, process: &str) -> DriverResult<()>;

    /// Run a command on every unit of the app, returning combined output.
    fn execute_command(&self, app: &App, cmd: &str) -> DriverResult<String>;

    /// Run a command once, on a single unit.
    fn execute_command_once(&self, app: &App, cmd: &str, flags: &[&str]) -> DriverResult<String>;

    /// Change the status of a unit.
    fn set_unit_status(&self, unit: &Unit, status: UnitStatus) -> DriverResult<()>;

    /// Register a newly placed unit with the driver.
    fn register_unit(&self, unit: &Unit, custom_data: HashMap<String, String>) -> DriverResult<()>;

    /// Exchange the routable addresses of two apps.
    fn swap(&self, app1: &App, app2: &App) -> DriverResult<()>;

    /// The public address of the app.
    fn addr(&self, app: &App) -> DriverResult<String>;

    /// Remove `n` units of the given process.
    fn remove_units(&self, app: &App, n: u32, process: &str) -> DriverResult<()>;

    /// Environment variables to expose for metric collection.
    fn metric_envs(&self, app: &App) -> HashMap<String, String>;

    /// Optional CNAME capability. Drivers that cannot manage CNAMEs
    /// return `None` (the default).
    fn cname_manager(&self) -> Option<&dyn CNameManager> {
        None
    }
}

/// Optional driver capability for publishing and retiring CNAMEs.
pub trait CNameManager: Send + Sync {
    fn set_cname(&self, app: &App, cname: &str) -> DriverResult<()>;
    fn unset_cname(&self, app: &App, cname: &str) -> DriverResult<()>;
}
