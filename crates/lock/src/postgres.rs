//! Lease table in PostgreSQL, shared by every service instance.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{LockHandle, LockKey, LockService, Result};

/// How often a waiting acquirer re-tries the lease insert.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// PostgreSQL-backed lease lock.
///
/// Each key is one row in `distributed_locks`. Taking a lease is a single
/// upsert that only overwrites a row whose lease has already expired, so the
/// database serializes competing instances.
#[derive(Clone)]
pub struct PostgresLockService {
    pool: PgPool,
    poll_interval: Duration,
}

impl PostgresLockService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// One acquisition attempt; returns the lease expiry on success.
    async fn try_once(
        &self,
        key: &LockKey,
        token: Uuid,
        lease: Duration,
    ) -> Result<Option<DateTime<Utc>>> {
        let expires_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO distributed_locks (lock_key, holder_token, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (lock_key) DO UPDATE
                SET holder_token = EXCLUDED.holder_token,
                    expires_at = EXCLUDED.expires_at
                WHERE distributed_locks.expires_at <= now()
            RETURNING expires_at
            "#,
        )
        .bind(key.as_str())
        .bind(token)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(expires_at)
    }
}

#[async_trait]
impl LockService for PostgresLockService {
    #[tracing::instrument(skip(self), fields(lock_key = %key))]
    async fn try_acquire(
        &self,
        key: &LockKey,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockHandle>> {
        let deadline = Instant::now() + wait;
        let token = Uuid::new_v4();

        loop {
            if let Some(expires_at) = self.try_once(key, token, lease).await? {
                return Ok(Some(LockHandle::new(key.clone(), token, expires_at)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    #[tracing::instrument(skip(self, handle), fields(lock_key = %handle.key()))]
    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1 AND holder_token = $2")
                .bind(handle.key().as_str())
                .bind(handle.token())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            tracing::debug!("lease already expired or taken over; release ignored");
        }
        Ok(())
    }
}
