//! Shared identifiers and value types.
//!
//! Every crate in the workspace speaks in these types so an order placed by
//! one service instance can be confirmed or reconciled by another.

mod money;
mod types;

pub use money::Money;
pub use types::{MemberId, OrderId, PaymentId, ProductId};
