//! Auth scheme interface (external identity module).

use thiserror::Error;

/// Error surfaced by the auth scheme.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AuthError(pub String);

/// Result type alias for auth calls.
pub type AuthResult<T> = Result<T, AuthError>;

/// The slice of the identity module the lifecycle coordinator consumes:
/// per-app token management and per-user app quota accounting.
pub trait AuthScheme: Send + Sync {
    /// Issue an app token, used by the app to call back into the platform.
    fn app_login(&self, app_name: &str) -> AuthResult<String>;

    /// Revoke an app token.
    fn app_logout(&self, token: &str) -> AuthResult<()>;

    /// Reserve one app slot in the user's quota.
    fn reserve_app(&self, user_email: &str) -> AuthResult<()>;

    /// Release one app slot from the user's quota.
    fn release_app(&self, user_email: &str) -> AuthResult<()>;
}
