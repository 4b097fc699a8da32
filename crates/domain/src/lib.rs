//! Domain layer for concurrent ordering.
//!
//! This crate provides:
//! - The shop model: [`Member`], [`Product`], [`Order`], [`Payment`]
//! - Stock bookkeeping on [`Product`] (check-and-decrement, restock)
//! - [`OrderService`], the critical section that turns a request into a
//!   persisted order while the product lock is held
//! - [`OrderOrchestrator`], which wraps that critical section in the
//!   per-product distributed lock
//! - Order search and per-member order statistics
//! - The [`ShopStore`] repository contract and an in-memory implementation

pub mod member;
pub mod order;
pub mod payment;
pub mod product;
pub mod repository;

pub use member::Member;
pub use order::{
    CancelOrder, MemberOrderStats, Order, OrderError, OrderFilter, OrderLine, OrderOrchestrator,
    OrderRecord, OrderSearch, OrderService, OrderStatus, Page, PageRequest, PlaceOrder,
    StatsFilter,
};
pub use payment::{Payment, PaymentStatus};
pub use product::{Product, SellStatus};
pub use repository::{InMemoryShopStore, ShopStore, StoreError};
