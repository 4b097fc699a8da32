//! Places orders under the per-product distributed lock.

use std::time::Instant;

use lock::{LockKey, LockService, RetryingLockAcquirer};

use super::{Order, OrderError, OrderService, PlaceOrder};
use crate::ShopStore;

/// Serializes order placement per product across every instance sharing the
/// lock backend.
///
/// Requests for different products never contend.
pub struct OrderOrchestrator<S: ShopStore, L: LockService + Clone + 'static> {
    orders: OrderService<S>,
    acquirer: RetryingLockAcquirer<L>,
}

impl<S, L> OrderOrchestrator<S, L>
where
    S: ShopStore,
    L: LockService + Clone + 'static,
{
    pub fn new(orders: OrderService<S>, acquirer: RetryingLockAcquirer<L>) -> Self {
        Self { orders, acquirer }
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn acquirer(&self) -> &RetryingLockAcquirer<L> {
        &self.acquirer
    }

    /// Acquires the product's lock, runs the critical section and releases
    /// the lock whatever the outcome.
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<Order, OrderError> {
        self.place_order_or_cancel(cmd, std::future::pending::<()>())
            .await
    }

    /// Like [`place_order`](Self::place_order), but stops waiting for the lock
    /// with [`OrderError::OrderProcessingAborted`] once `cancel` completes.
    #[tracing::instrument(skip(self, cancel), fields(product_id = %cmd.product_id, quantity = cmd.quantity))]
    pub async fn place_order_or_cancel<C>(
        &self,
        cmd: PlaceOrder,
        cancel: C,
    ) -> Result<Order, OrderError>
    where
        C: Future<Output = ()>,
    {
        let key = LockKey::for_product(cmd.product_id);
        let started = Instant::now();

        let result = self
            .acquirer
            .with_lock_or_cancel(&key, cancel, || self.orders.place_order(cmd))
            .await;

        metrics::histogram!("order_place_duration_seconds").record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::debug!(error = %e, "order not placed");
        }
        result
    }
}
