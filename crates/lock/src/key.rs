use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ProductId;
use uuid::Uuid;

/// Name of a lock in the shared backend.
///
/// Keys are derived from the request and passed down the call chain; product
/// keys have the form `lock:product:<productId>`, so unrelated products never
/// contend with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Key guarding the stock of a single product.
    pub fn for_product(product_id: ProductId) -> Self {
        Self(format!("lock:product:{product_id}"))
    }

    /// Creates a key from an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of a granted lease.
///
/// Exists only for the duration of one critical-section attempt and is
/// never persisted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: LockKey,
    token: Uuid,
    lease_expires_at: DateTime<Utc>,
}

impl LockHandle {
    pub fn new(key: LockKey, token: Uuid, lease_expires_at: DateTime<Utc>) -> Self {
        Self {
            key,
            token,
            lease_expires_at,
        }
    }

    /// Builds a handle whose lease runs `lease` from now.
    pub fn leased_for(key: LockKey, token: Uuid, lease: Duration) -> Self {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        let lease_expires_at = Utc::now()
            .checked_add_signed(lease)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(key, token, lease_expires_at)
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Holder token identifying this grant in the backend.
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn lease_expires_at(&self) -> DateTime<Utc> {
        self.lease_expires_at
    }

    /// Returns true once the lease has run out by the local clock.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.lease_expires_at
    }
}
