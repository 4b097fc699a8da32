//! Bounded-attempt, fixed-backoff lock acquisition.

use std::future::Future;
use std::time::Duration;

use crate::{LockError, LockHandle, LockKey, LockService};

/// Tuning for [`RetryingLockAcquirer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up with [`LockError::Exhausted`].
    pub max_attempts: u32,
    /// Sleep between two failed attempts.
    pub backoff: Duration,
    /// How long a single attempt waits for the lock to free up.
    pub wait_per_try: Duration,
    /// Lease granted on success; the lock self-expires after this.
    pub lease: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, wait_per_try: Duration, lease: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            wait_per_try,
            lease,
        }
    }

    /// Upper bound on the time spent before reporting exhaustion.
    pub fn worst_case_wait(&self) -> Duration {
        (self.wait_per_try + self.backoff) * self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            backoff: Duration::from_millis(50),
            wait_per_try: Duration::from_millis(500),
            lease: Duration::from_millis(5_000),
        }
    }
}

/// Runs work under a distributed lock with a bounded retry policy.
///
/// Each attempt waits at most `wait_per_try`, so a lease stuck on a crashed
/// peer never pins a task indefinitely; once the attempts run out the caller
/// gets an explicit [`LockError::Exhausted`] instead of a silent timeout.
#[derive(Debug, Clone)]
pub struct RetryingLockAcquirer<L> {
    service: L,
    policy: RetryPolicy,
}

impl<L> RetryingLockAcquirer<L>
where
    L: LockService + Clone + 'static,
{
    pub fn new(service: L, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn service(&self) -> &L {
        &self.service
    }

    /// Acquires `key`, runs `work`, and releases the lock exactly once.
    pub async fn with_lock<T, E, F, Fut>(&self, key: &LockKey, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.with_lock_or_cancel(key, std::future::pending::<()>(), work)
            .await
    }

    /// Like [`with_lock`](Self::with_lock), but gives up with
    /// [`LockError::Aborted`] if `cancel` completes before the lock is held.
    ///
    /// Once the lock is held `cancel` is no longer observed: the work runs to
    /// completion and the lock is released. If the whole future is dropped
    /// mid-work, the release is handed to the runtime and the lease bounds
    /// the worst case.
    #[tracing::instrument(skip(self, cancel, work), fields(lock_key = %key))]
    pub async fn with_lock_or_cancel<T, E, F, Fut, C>(
        &self,
        key: &LockKey,
        cancel: C,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
        C: Future<Output = ()>,
    {
        let handle = self.acquire(key, cancel).await?;
        let held = HeldLock {
            service: self.service.clone(),
            handle: Some(handle),
        };

        let result = work().await;
        held.release().await;
        result
    }

    async fn acquire<C>(&self, key: &LockKey, cancel: C) -> Result<LockHandle, LockError>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let policy = self.policy;

        for attempt in 1..=policy.max_attempts {
            metrics::counter!("order_lock_attempts_total").increment(1);

            let outcome = tokio::select! {
                biased;
                () = &mut cancel => return Err(LockError::Aborted { key: key.clone() }),
                outcome = self.service.try_acquire(key, policy.wait_per_try, policy.lease) => outcome,
            };

            match outcome {
                Ok(Some(handle)) => {
                    tracing::debug!(attempt, "lock acquired");
                    return Ok(handle);
                }
                Ok(None) => tracing::debug!(attempt, "lock busy"),
                Err(e) => tracing::warn!(attempt, error = %e, "lock backend error"),
            }

            if attempt < policy.max_attempts {
                tokio::select! {
                    biased;
                    () = &mut cancel => return Err(LockError::Aborted { key: key.clone() }),
                    () = tokio::time::sleep(policy.backoff) => {}
                }
            }
        }

        metrics::counter!("order_lock_exhausted_total").increment(1);
        tracing::warn!(attempts = policy.max_attempts, "lock acquisition exhausted");
        Err(LockError::Exhausted {
            key: key.clone(),
            attempts: policy.max_attempts,
        })
    }
}

/// A lease this acquirer owns until it is released.
struct HeldLock<L: LockService + Clone + 'static> {
    service: L,
    handle: Option<LockHandle>,
}

impl<L: LockService + Clone + 'static> HeldLock<L> {
    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            release_quietly(&self.service, &handle).await;
        }
    }
}

impl<L: LockService + Clone + 'static> Drop for HeldLock<L> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let service = self.service.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { release_quietly(&service, &handle).await });
        }
    }
}

async fn release_quietly<L: LockService>(service: &L, handle: &LockHandle) {
    // An expired lease has already done its job; nothing to report.
    if let Err(e) = service.release(handle).await {
        tracing::debug!(lock_key = %handle.key(), error = %e, "lock release failed");
    }
}
