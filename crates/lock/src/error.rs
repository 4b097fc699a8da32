use thiserror::Error;

use crate::LockKey;

/// Errors raised while acquiring or releasing a distributed lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Every attempt of the retry policy failed to obtain the lease.
    #[error("Could not acquire {key} after {attempts} attempts")]
    Exhausted { key: LockKey, attempts: u32 },

    /// The caller cancelled while still waiting for the lease.
    #[error("Acquisition of {key} was aborted")]
    Aborted { key: LockKey },

    /// The lock backend refused or failed the request.
    #[error("Lock backend error: {0}")]
    Backend(String),

    /// A database error from the Postgres backend.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
