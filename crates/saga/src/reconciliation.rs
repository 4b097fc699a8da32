//! Periodic repair of charges whose payment record was never stored.

use std::sync::Arc;
use std::time::Duration;

use domain::{Order, ShopStore};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::completion::record_payment;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::gateway::PaymentGateway;

/// Finds orders left `PAYMENT_PENDING` with a gateway key but no payment,
/// asks the gateway about each and stores the payment when it was settled.
///
/// Safe to run repeatedly and from several instances: payment keys are
/// unique, so a replay stores nothing new.
pub struct ReconciliationJob<S: ShopStore, G: PaymentGateway> {
    store: S,
    gateway: G,
    publisher: EventPublisher,
    running: Mutex<()>,
}

impl<S: ShopStore, G: PaymentGateway> ReconciliationJob<S, G> {
    pub fn new(store: S, gateway: G, publisher: EventPublisher) -> Self {
        Self {
            store,
            gateway,
            publisher,
            running: Mutex::new(()),
        }
    }

    /// Runs one pass and returns how many orders were repaired.
    ///
    /// Returns 0 immediately if another pass of this job is in progress.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize> {
        let Ok(_pass) = self.running.try_lock() else {
            tracing::debug!("reconciliation already running");
            return Ok(0);
        };
        metrics::counter!("reconciliation_runs_total").increment(1);

        let orders = self
            .store
            .find_unreconciled_orders()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "could not list unreconciled orders"))?;

        if orders.is_empty() {
            tracing::debug!("no payments to reconcile");
            return Ok(0);
        }
        tracing::warn!(count = orders.len(), "orders missing payment records");

        let mut repaired = 0;
        for order in &orders {
            if self.repair(order).await {
                repaired += 1;
            }
        }

        metrics::counter!("reconciliation_repaired_total").increment(repaired as u64);
        tracing::info!(repaired, pending = orders.len() - repaired, "reconciliation pass finished");
        Ok(repaired)
    }

    /// Repairs one order; failures are logged and the order is left for the
    /// next pass.
    async fn repair(&self, order: &Order) -> bool {
        let order_id = order.id();
        let Some(payment_key) = order.payment_key() else {
            return false;
        };

        let payment = match self.gateway.find_by_payment_key(payment_key).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::error!(%order_id, error = %e, "gateway lookup failed");
                return false;
            }
        };

        if !payment.status.is_done() {
            tracing::warn!(%order_id, status = %payment.status, "gateway payment not settled");
            return false;
        }
        if payment.total_amount != order.total_amount() {
            tracing::error!(
                %order_id,
                charged = %payment.total_amount,
                expected = %order.total_amount(),
                "gateway amount differs from order total"
            );
            return false;
        }

        match record_payment(&self.store, &self.publisher, order, &payment).await {
            Ok(true) => {
                tracing::info!(%order_id, "payment record repaired");
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::error!(%order_id, error = %e, "could not store recovered payment");
                false
            }
        }
    }
}

impl<S, G> ReconciliationJob<S, G>
where
    S: ShopStore + 'static,
    G: PaymentGateway + 'static,
{
    /// Runs [`reconcile`](Self::reconcile) every `interval` until `shutdown`
    /// completes. Ticks missed while a pass runs long are skipped.
    pub fn spawn<F>(self: Arc<Self>, interval: Duration, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    biased;
                    () = &mut shutdown => break,
                    _ = ticker.tick() => {
                        // Failures are logged inside and retried next tick.
                        let _ = self.reconcile().await;
                    }
                }
            }
            tracing::info!("reconciliation job stopped");
        })
    }
}
