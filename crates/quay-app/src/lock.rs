//! Application lock protocol — single-holder advisory lock per app.
//!
//! The lock lives on the app document; acquisition is a conditional
//! store update that only applies while the lock is free. Contention is
//! handled by polling at a fixed 300 ms interval until the caller's
//! timeout elapses.

use std::time::Duration;

use tracing::error;

use quay_core::types::AppLock;
use quay_state::{epoch_secs, StateStore};

use crate::error::AppResult;

/// Poll interval while waiting for a held lock.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Acquire the app lock, giving up immediately when it is held.
pub async fn acquire_app_lock(
    store: &StateStore,
    app_name: &str,
    owner: &str,
    reason: &str,
) -> AppResult<bool> {
    acquire_app_lock_wait(store, app_name, owner, reason, Duration::ZERO).await
}

/// Acquire the app lock, retrying every 300 ms until `timeout` elapses.
///
/// Returns `Ok(true)` on acquisition and `Ok(false)` on timeout (a held
/// lock within the deadline is not an error). Store errors are surfaced.
pub async fn acquire_app_lock_wait(
    store: &StateStore,
    app_name: &str,
    owner: &str,
    reason: &str,
    timeout: Duration,
) -> AppResult<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let lock = AppLock {
            locked: true,
            reason: reason.to_string(),
            owner: owner.to_string(),
            acquire_date: epoch_secs(),
        };
        if store.try_acquire_app_lock(app_name, &lock)? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
    }
}

/// Unconditionally release the app lock. Store errors are logged, not
/// surfaced; releasing an unlocked or missing app is a no-op.
pub fn release_app_lock(store: &StateStore, app_name: &str) {
    if let Err(err) = store.release_app_lock(app_name) {
        error!(app = app_name, error = %err, "could not release app lock");
    }
}
