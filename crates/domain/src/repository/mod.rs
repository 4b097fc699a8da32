//! Persistence contract for members, products, orders and payments.

mod memory;

pub use memory::InMemoryShopStore;

use async_trait::async_trait;
use common::{MemberId, OrderId, ProductId};
use thiserror::Error;

use crate::{
    Member, MemberOrderStats, Order, OrderFilter, OrderStatus, Page, Payment, Product, StatsFilter,
};

/// Errors raised by a [`ShopStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A guarded stock decrement found fewer units than requested.
    #[error("Stock conflict on product {product_id}")]
    StockConflict { product_id: ProductId },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The row was not in a status that allows the requested change.
    #[error("Order {order_id} is {status}")]
    StaleState {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The order already has a different payment attached.
    #[error("Order {order_id} already has a payment")]
    DuplicatePayment { order_id: OrderId },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn order_not_found(order_id: OrderId) -> Self {
        StoreError::NotFound {
            entity: "order",
            id: order_id.to_string(),
        }
    }
}

/// Durable storage for the shop.
///
/// Each write is a single transaction: either every effect is visible or
/// none is.
#[async_trait]
pub trait ShopStore: Send + Sync {
    async fn save_member(&self, member: &Member) -> Result<(), StoreError>;

    async fn find_member(&self, id: MemberId) -> Result<Option<Member>, StoreError>;

    async fn save_product(&self, product: &Product) -> Result<(), StoreError>;

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Stores a new order and takes its quantities out of stock.
    ///
    /// Each decrement is guarded by `stock >= quantity`; if any guard fails
    /// the whole write is rolled back with [`StoreError::StockConflict`].
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Moves an open order to `PAYMENT_PENDING`, recording `payment_key` if
    /// given.
    async fn mark_payment_pending(
        &self,
        order_id: OrderId,
        payment_key: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Cancels an open order and returns the stock of every line.
    ///
    /// Returns `false` without touching stock if the order was already
    /// cancelled, so stock is returned at most once.
    async fn cancel_order(&self, order_id: OrderId) -> Result<bool, StoreError>;

    /// Stores `payment` and marks its order `COMPLETED`.
    ///
    /// Returns `false` if a payment with the same key already exists, which
    /// makes repeated completion for one gateway payment a no-op.
    async fn complete_payment(&self, payment: &Payment) -> Result<bool, StoreError>;

    async fn find_payment_by_key(&self, payment_key: &str) -> Result<Option<Payment>, StoreError>;

    async fn find_payment_for_order(&self, order_id: OrderId)
    -> Result<Option<Payment>, StoreError>;

    async fn list_payments(&self) -> Result<Vec<Payment>, StoreError>;

    /// Orders left `PAYMENT_PENDING` with a payment key but no payment record.
    async fn find_unreconciled_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// One page of the orders matching `filter`, newest first.
    async fn search_orders(&self, filter: &OrderFilter) -> Result<Page<Order>, StoreError>;

    /// Per-member order count, total, average and latest order time over
    /// every order the member placed, for members whose total reaches
    /// `filter.min_amount`. Largest totals first.
    async fn order_statistics(
        &self,
        filter: &StatsFilter,
    ) -> Result<Page<MemberOrderStats>, StoreError>;
}
