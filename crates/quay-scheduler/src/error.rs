//! Error types for the segregated scheduler.

use thiserror::Error;

use quay_state::StateError;

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur during placement decisions.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("app not found: {0}")]
    AppNotFound(String),

    #[error("no default pool")]
    NoDefaultPool,

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("team {team} does not have access to pool {pool}")]
    PoolAccessDenied { pool: String, team: String },

    #[error("no nodes found with one of the following metadata: {}", pools_metadata(.0))]
    NoNodesInPools(Vec<String>),

    #[error("no nodes found with enough memory for container of {app:?}: {requested_mb:.4}MB")]
    NotEnoughMemory { app: String, requested_mb: f64 },

    #[error("no nodes available for scheduling")]
    NoNodesAvailable,

    #[error("unit not found")]
    UnitNotFound,

    #[error(transparent)]
    State(#[from] StateError),
}

fn pools_metadata(pools: &[String]) -> String {
    pools
        .iter()
        .map(|p| format!("pool={p}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_nodes_message_enumerates_pools() {
        let err = SchedulerError::NoNodesInPools(vec!["mypool".to_string(), "mypool2".to_string()]);
        assert_eq!(
            err.to_string(),
            "no nodes found with one of the following metadata: pool=mypool, pool=mypool2"
        );
    }

    #[test]
    fn not_enough_memory_message_formats_megabytes() {
        let err = SchedulerError::NotEnoughMemory {
            app: "oblivion".to_string(),
            requested_mb: 20000.0 / (1024.0 * 1024.0),
        };
        assert_eq!(
            err.to_string(),
            "no nodes found with enough memory for container of \"oblivion\": 0.0191MB"
        );
    }
}
