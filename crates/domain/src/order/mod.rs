//! Orders: the record, its status machine and the services that place them.

mod aggregate;
mod commands;
mod orchestrator;
mod query;
mod service;
mod state;

pub use aggregate::{Order, OrderLine, OrderRecord};
pub use commands::{CancelOrder, PlaceOrder};
pub use orchestrator::OrderOrchestrator;
pub use query::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MemberOrderStats, OrderFilter, OrderSearch, Page,
    PageRequest, StatsFilter,
};
pub use service::OrderService;
pub use state::OrderStatus;

use common::{MemberId, OrderId, ProductId};
use lock::{LockError, LockKey};
use thiserror::Error;

use crate::StoreError;

/// Errors that can occur while placing or changing orders.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Member not found: {0}")]
    MemberNotFound(MemberId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Requested more units than the product has in stock.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Order has no lines")]
    NoLines,

    /// The order total does not fit in the money type.
    #[error("Order total is too large")]
    AmountOverflow,

    /// Search criteria that do not describe a usable period.
    #[error("Invalid search: {0}")]
    InvalidSearch(String),

    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// The order belongs to a different member.
    #[error("Order {order_id} does not belong to member {member_id}")]
    OrderMemberMismatch {
        order_id: OrderId,
        member_id: MemberId,
    },

    /// The product lock stayed busy for the whole retry policy.
    #[error("Could not lock {key} after {attempts} attempts")]
    LockAcquisitionExhausted { key: LockKey, attempts: u32 },

    /// The caller went away while waiting for the product lock.
    #[error("Order processing aborted while waiting for {key}")]
    OrderProcessingAborted { key: LockKey },

    #[error("Lock error: {0}")]
    Lock(LockError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            OrderError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            OrderError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            OrderError::InsufficientStock { .. } => "NOT_ENOUGH_STOCK",
            OrderError::InvalidQuantity { .. }
            | OrderError::NoLines
            | OrderError::AmountOverflow => "INVALID_ORDER",
            OrderError::InvalidSearch(_) => "INVALID_SEARCH",
            OrderError::InvalidStateTransition { .. } => "INVALID_ORDER_STATE",
            OrderError::OrderMemberMismatch { .. } => "ORDER_MEMBER_MISMATCH",
            OrderError::LockAcquisitionExhausted { .. } => "ORDER_LOCK_FAILED",
            OrderError::OrderProcessingAborted { .. } | OrderError::Lock(_) => "ORDER_ERROR",
            OrderError::Store(_) => "ORDER_ERROR",
        }
    }
}

impl From<LockError> for OrderError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Exhausted { key, attempts } => {
                OrderError::LockAcquisitionExhausted { key, attempts }
            }
            LockError::Aborted { key } => OrderError::OrderProcessingAborted { key },
            other => OrderError::Lock(other),
        }
    }
}
