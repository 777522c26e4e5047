//! Error types for application lifecycle operations.

use thiserror::Error;

use quay_scheduler::SchedulerError;
use quay_state::StateError;

use crate::auth::AuthError;
use crate::driver::DriverError;
use crate::repository::RepositoryError;
use crate::router::RouterError;

/// Result type alias for lifecycle operations.
pub type AppResult<T> = Result<T, AppError>;

/// Errors that can occur during application lifecycle operations.
#[derive(Debug, Error)]
pub enum AppError {
    // Validation
    #[error(
        "invalid app name, your app should have at most 63 characters, containing \
         only lower case letters, numbers or dashes, starting with a letter"
    )]
    InvalidName,

    #[error("invalid cname")]
    InvalidCname,

    #[error("user does not belong to any team")]
    NoTeams,

    #[error("you belong to more than one team, choose one as the app's team owner")]
    ManyTeams,

    #[error("platform not found: {0}")]
    PlatformNotFound(String),

    #[error("disabled platform, only admin users can create applications with it")]
    DisabledPlatform,

    #[error("team {0} cannot be set as the app's owner, choose one of your teams")]
    InvalidTeamOwner(String),

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("no default plan configured")]
    NoDefaultPlan,

    #[error("quota exceeded: requested {requested}, available {available}")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("cannot set quota usage for unlimited quota")]
    UnlimitedQuota,

    #[error("quota usage cannot exceed the limit of {0}")]
    QuotaUsageTooHigh(i64),

    #[error("cannot add zero units")]
    ZeroUnits,

    // Preconditions
    #[error("app not found")]
    AppNotFound,

    #[error("team already have access to this app")]
    AlreadyHaveAccess,

    #[error("team does not have access to this app")]
    NoAccess,

    #[error("cannot revoke access from this team, as it's the unique team with access to the app")]
    CannotOrphanApp,

    #[error("cname already exists")]
    CnameExists,

    #[error("cname not found")]
    CnameNotFound,

    #[error("application is swapped with {0:?}, cannot remove it")]
    AppSwapped(String),

    #[error("app {app} is locked: {holder}")]
    Locked { app: String, holder: String },

    #[error("unit not found")]
    UnitNotFound,

    #[error("app must be available to run commands")]
    NotAvailable,

    // Pools
    #[error("pool not found")]
    PoolNotFound,

    #[error("you have access to more than one pool, choose one for the app")]
    ManyPools,

    #[error("you don't have access to pool {0}")]
    PoolAccessDenied(String),

    #[error("no default pool")]
    NoDefaultPool,

    #[error("router not found: {0}")]
    RouterNotFound(String),

    // Pipeline failures
    #[error("failed to create the app {app:?}: {source}")]
    AppCreation {
        app: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    // External collaborators
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("repository manager error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
}
