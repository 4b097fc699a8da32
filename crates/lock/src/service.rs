use std::time::Duration;

use async_trait::async_trait;

use crate::{LockHandle, LockKey, Result};

/// Client contract for a shared, lease-based mutual-exclusion backend.
///
/// The backend must be reachable by every service instance: it is the only
/// source of cross-instance exclusion. Implementations carry no business logic.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Waits up to `wait` for `key` to become free and takes it for `lease`.
    ///
    /// Returns `Ok(None)` when the wait elapses with the lock still held
    /// elsewhere. A granted lease expires on its own after `lease`, even if
    /// the holder never releases it.
    async fn try_acquire(
        &self,
        key: &LockKey,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockHandle>>;

    /// Releases a lease.
    ///
    /// Releasing an expired lease, or one now held by someone else, is a
    /// no-op and returns `Ok(())`. Errors are reserved for backend failures.
    async fn release(&self, handle: &LockHandle) -> Result<()>;
}
