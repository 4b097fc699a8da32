//! In-process lease table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{LockError, LockHandle, LockKey, LockService, Result};

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct InMemoryLockState {
    leases: HashMap<String, Lease>,
    unreachable: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<InMemoryLockState>,
    released: Notify,
}

/// Lease-based lock service held in memory.
///
/// Clones share the same lease table, so several service instances built in
/// one process contend exactly as they would against a remote backend. Only
/// suitable as the production backend when a single instance is deployed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockService {
    shared: Arc<Shared>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the backend could not be reached.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.shared.state.lock().await.unreachable = unreachable;
    }

    /// Returns true if `key` is held by a lease that has not expired.
    pub async fn is_locked(&self, key: &LockKey) -> bool {
        let state = self.shared.state.lock().await;
        state
            .leases
            .get(key.as_str())
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(
        &self,
        key: &LockKey,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockHandle>> {
        let deadline = Instant::now() + wait;

        loop {
            // Register for the release signal before inspecting the table so a
            // release between the check and the wait is not missed.
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.shared.state.lock().await;
                if state.unreachable {
                    return Err(LockError::Backend("lock backend unreachable".to_string()));
                }

                let now = Instant::now();
                match state.leases.get(key.as_str()) {
                    Some(current) if current.expires_at > now => current.expires_at.min(deadline),
                    _ => {
                        let token = Uuid::new_v4();
                        state.leases.insert(
                            key.as_str().to_string(),
                            Lease {
                                token,
                                expires_at: now + lease,
                            },
                        );
                        return Ok(Some(LockHandle::leased_for(key.clone(), token, lease)));
                    }
                }
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Re-check the table after any wakeup, timeouts included.
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if state.unreachable {
            return Err(LockError::Backend("lock backend unreachable".to_string()));
        }

        let owned = state
            .leases
            .get(handle.key().as_str())
            .is_some_and(|lease| lease.token == handle.token());
        if owned {
            state.leases.remove(handle.key().as_str());
            drop(state);
            self.shared.released.notify_waiters();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);
    const LEASE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_acquire_free_key() {
        let locks = InMemoryLockService::new();
        let key = LockKey::new("lock:product:1");

        let handle = locks.try_acquire(&key, WAIT, LEASE).await.unwrap();
        assert!(handle.is_some());
        assert!(locks.is_locked(&key).await);
    }

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let locks = InMemoryLockService::new();
        let key = LockKey::new("lock:product:1");

        let _held = locks.try_acquire(&key, WAIT, LEASE).await.unwrap().unwrap();
        let started = std::time::Instant::now();
        let second = locks.try_acquire(&key, WAIT, LEASE).await.unwrap();

        assert!(second.is_none());
        assert!(started.elapsed() >= WAIT);
    }

    #[tokio::test]
    async fn test_clones_share_leases() {
        let instance_a = InMemoryLockService::new();
        let instance_b = instance_a.clone();
        let key = LockKey::new("lock:product:1");

        let _held = instance_a.try_acquire(&key, WAIT, LEASE).await.unwrap().unwrap();
        assert!(instance_b.try_acquire(&key, WAIT, LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = InMemoryLockService::new();

        let a = locks.try_acquire(&LockKey::new("a"), WAIT, LEASE).await.unwrap();
        let b = locks.try_acquire(&LockKey::new("b"), WAIT, LEASE).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let locks = InMemoryLockService::new();
        let key = LockKey::new("lock:product:1");
        let held = locks.try_acquire(&key, WAIT, LEASE).await.unwrap().unwrap();

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                locks
                    .try_acquire(&key, Duration::from_secs(5), LEASE)
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        locks.release(&held).await.unwrap();

        let started = std::time::Instant::now();
        let acquired = waiter.await.unwrap();
        assert!(acquired.is_some());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let locks = InMemoryLockService::new();
        let key = LockKey::new("lock:product:1");

        let _crashed = locks
            .try_acquire(&key, WAIT, Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();

        let next = locks
            .try_acquire(&key, Duration::from_millis(500), LEASE)
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_release_twice_is_noop() {
        let locks = InMemoryLockService::new();
        let key = LockKey::new("lock:product:1");
        let handle = locks.try_acquire(&key, WAIT, LEASE).await.unwrap().unwrap();

        locks.release(&handle).await.unwrap();
        locks.release(&handle).await.unwrap();
        assert!(!locks.is_locked(&key).await);
    }

    #[tokio::test]
    async fn test_stale_release_does_not_free_new_holder() {
        let locks = InMemoryLockService::new();
        let key = LockKey::new("lock:product:1");

        let stale = locks
            .try_acquire(&key, WAIT, Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let _current = locks.try_acquire(&key, WAIT, LEASE).await.unwrap().unwrap();

        locks.release(&stale).await.unwrap();
        assert!(locks.is_locked(&key).await);
    }

    #[tokio::test]
    async fn test_unreachable_backend_errors() {
        let locks = InMemoryLockService::new();
        locks.set_unreachable(true).await;

        let result = locks.try_acquire(&LockKey::new("k"), WAIT, LEASE).await;
        assert!(matches!(result, Err(LockError::Backend(_))));
    }
}
