//! Repository manager interface (external git hosting).

use thiserror::Error;

/// Error surfaced by the repository manager.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RepositoryError(pub String);

/// Result type alias for repository calls.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// The git-hosting manager consumed during app creation and access
/// control changes.
pub trait RepositoryManager: Send + Sync {
    /// Create the app's repository, granting access to the given users.
    fn create_repository(&self, name: &str, users: &[String]) -> RepositoryResult<()>;

    /// Remove the app's repository.
    fn remove_repository(&self, name: &str) -> RepositoryResult<()>;

    fn grant_access(&self, repo: &str, user: &str) -> RepositoryResult<()>;

    fn revoke_access(&self, repo: &str, user: &str) -> RepositoryResult<()>;
}
