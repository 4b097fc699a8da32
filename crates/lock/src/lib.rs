//! Distributed lock plumbing for per-product critical sections.
//!
//! - [`LockService`] is the thin client contract over a shared lease backend.
//! - [`InMemoryLockService`] shares one lease table between clones; it stands in
//!   for the backend in tests and in single-instance deployments.
//! - [`PostgresLockService`] keeps leases in a table every instance can reach.
//! - [`RetryingLockAcquirer`] wraps any backend with a bounded, fixed-backoff
//!   acquisition loop and releases exactly once.

pub mod acquirer;
pub mod error;
pub mod key;
pub mod memory;
pub mod postgres;
pub mod service;

pub use acquirer::{RetryPolicy, RetryingLockAcquirer};
pub use error::{LockError, Result};
pub use key::{LockHandle, LockKey};
pub use memory::InMemoryLockService;
pub use postgres::PostgresLockService;
pub use service::LockService;
