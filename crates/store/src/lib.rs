//! PostgreSQL implementation of [`domain::ShopStore`].
//!
//! Every write runs in one transaction. Stock decrements are guarded in SQL
//! (`stock_quantity >= $n`) so the database refuses an oversell even if the
//! product lock were bypassed, and payment rows are unique per gateway key so
//! replayed completions are no-ops.

mod postgres;
mod rows;

pub use postgres::PostgresShopStore;
