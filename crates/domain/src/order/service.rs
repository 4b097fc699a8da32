//! The order critical section and order lookups.

use chrono::Utc;
use common::{MemberId, OrderId};

use super::{
    CancelOrder, MemberOrderStats, Order, OrderError, OrderLine, OrderSearch, Page, PlaceOrder,
    StatsFilter,
};
use crate::{ShopStore, StoreError};

/// Runs order operations against a [`ShopStore`].
///
/// [`OrderService::place_order`] is the critical section: it must run while
/// the product's lock is held, which [`super::OrderOrchestrator`] arranges.
pub struct OrderService<S: ShopStore> {
    store: S,
}

impl<S: ShopStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Checks stock, builds the order and persists it with the stock
    /// decrement as one unit.
    ///
    /// On any error nothing is persisted.
    #[tracing::instrument(skip(self), fields(member_id = %cmd.member_id, product_id = %cmd.product_id))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<Order, OrderError> {
        if cmd.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: cmd.quantity,
            });
        }

        let member = self
            .store
            .find_member(cmd.member_id)
            .await?
            .ok_or(OrderError::MemberNotFound(cmd.member_id))?;
        let mut product = self
            .store
            .find_product(cmd.product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(cmd.product_id))?;

        let available = product.stock_quantity;
        product.remove_stock(cmd.quantity)?;

        let order = Order::place(&member, vec![OrderLine::snapshot(&product, cmd.quantity)])?;

        self.store
            .insert_order(&order)
            .await
            .map_err(|e| match e {
                StoreError::StockConflict { product_id } => OrderError::InsufficientStock {
                    product_id,
                    requested: cmd.quantity,
                    available,
                },
                other => other.into(),
            })?;

        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(
            order_id = %order.id(),
            order_number = order.order_number(),
            remaining_stock = product.stock_quantity,
            "order placed"
        );
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Looks up an order on behalf of `member_id`, who must own it.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_for_member(
        &self,
        member_id: MemberId,
        order_id: OrderId,
    ) -> Result<Order, OrderError> {
        let order = self.get_order(order_id).await?;
        if !order.is_owned_by(member_id) {
            return Err(OrderError::OrderMemberMismatch {
                order_id,
                member_id,
            });
        }
        Ok(order)
    }

    /// Cancels a member's own order and returns its stock.
    ///
    /// Cancelling an already cancelled order is a no-op; a completed order
    /// cannot be cancelled.
    #[tracing::instrument(skip(self), fields(member_id = %cmd.member_id, order_id = %cmd.order_id))]
    pub async fn cancel_order(&self, cmd: CancelOrder) -> Result<Order, OrderError> {
        let mut order = self.get_order_for_member(cmd.member_id, cmd.order_id).await?;

        if order.status() == super::OrderStatus::Canceled {
            return Ok(order);
        }
        order.cancel()?;

        if self.store.cancel_order(cmd.order_id).await? {
            tracing::info!("order cancelled and stock returned");
        }
        self.get_order(cmd.order_id).await
    }

    /// Orders in the search window, newest first.
    #[tracing::instrument(skip(self, search))]
    pub async fn search_orders(&self, search: &OrderSearch) -> Result<Page<Order>, OrderError> {
        let filter = search.resolve(Utc::now())?;
        tracing::debug!(from = %filter.from, to = %filter.to, "searching orders");
        Ok(self.store.search_orders(&filter).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn order_statistics(
        &self,
        filter: StatsFilter,
    ) -> Result<Page<MemberOrderStats>, OrderError> {
        Ok(self.store.order_statistics(&filter).await?)
    }
}
