//! The payment confirmation saga.

use std::time::Instant;

use common::OrderId;
use domain::{OrderError, Payment, ShopStore};

use crate::completion::record_payment;
use crate::error::{Result, SagaError};
use crate::events::EventPublisher;
use crate::gateway::{ConfirmPaymentRequest, GatewayPayment, PaymentGateway, decode_order_id};
use crate::state::{ConfirmPayment, OrderPaymentInfo, PaymentOutcome};

/// Drives payment confirmation against the gateway with compensation on
/// gateway failure.
///
/// Failures are handled asymmetrically. If the gateway refuses, nothing was
/// charged, so the order is cancelled and its stock returned. If local
/// storage fails after the gateway accepted, the charge stands and the
/// caller is told it succeeded; [`crate::ReconciliationJob`] stores the
/// payment later.
pub struct PaymentSaga<S: ShopStore, G: PaymentGateway> {
    store: S,
    gateway: G,
    publisher: EventPublisher,
}

impl<S: ShopStore, G: PaymentGateway> PaymentSaga<S, G> {
    pub fn new(store: S, gateway: G, publisher: EventPublisher) -> Self {
        Self {
            store,
            gateway,
            publisher,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Moves the order to `PAYMENT_PENDING` and returns what the payment
    /// widget needs.
    #[tracing::instrument(skip(self))]
    pub async fn prepare_payment(&self, order_id: OrderId) -> Result<OrderPaymentInfo> {
        let mut order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;
        let member = self
            .store
            .find_member(order.member_id())
            .await?
            .ok_or(OrderError::MemberNotFound(order.member_id()))?;

        order.await_payment(None)?;
        self.store.mark_payment_pending(order_id, None).await?;

        Ok(OrderPaymentInfo::new(&order, &member))
    }

    /// Confirms a payment with the gateway and records it.
    ///
    /// Returns [`SagaError::GatewayFailure`] after compensating when the
    /// gateway refuses or the amount does not match the order.
    ///
    /// No lock is held across the gateway call. If the member cancels the
    /// order after the gateway accepted the charge but before its key is
    /// recorded, the key is never stored: the order stays `CANCELED` with
    /// the customer charged, and reconciliation cannot find it because it
    /// only scans `PAYMENT_PENDING` orders that carry a key. The call then
    /// returns [`PaymentOutcome::PendingReconciliation`] and counts a
    /// persistence gap, so the charge must be refunded by hand.
    #[tracing::instrument(skip(self, request), fields(payment_key = %request.payment_key))]
    pub async fn confirm_payment(&self, request: ConfirmPayment) -> Result<PaymentOutcome> {
        let started = Instant::now();
        let order_id = decode_order_id(&request.order_id)?;
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if !order.status().can_await_payment() {
            return Err(OrderError::InvalidStateTransition {
                current_state: order.status(),
                action: "confirm payment",
            }
            .into());
        }

        if request.amount != order.total_amount() {
            let message = format!(
                "amount {} does not match order total {}",
                request.amount,
                order.total_amount()
            );
            return Err(self.compensate(order_id, "AMOUNT_MISMATCH", message).await);
        }

        // Step A: charge.
        let gateway_request = ConfirmPaymentRequest {
            payment_key: request.payment_key.clone(),
            order_id: request.order_id.clone(),
            amount: request.amount,
        };
        let payment = match self.gateway.confirm(&gateway_request).await {
            Ok(payment) => payment,
            Err(e) => return Err(self.compensate(order_id, e.code(), e.message()).await),
        };

        // Step B: remember the key so reconciliation can find this charge.
        if let Err(e) = self
            .store
            .mark_payment_pending(order_id, Some(&payment.payment_key))
            .await
        {
            metrics::counter!("payment_persistence_gaps_total").increment(1);
            tracing::error!(
                %order_id,
                error = %e,
                "charged payment key could not be recorded on the order"
            );
            return Ok(PaymentOutcome::PendingReconciliation { order_id, payment });
        }

        // Step C: store the payment and complete the order.
        let outcome = match record_payment(&self.store, &self.publisher, &order, &payment).await {
            Ok(_) => {
                metrics::counter!("payment_confirmations_total").increment(1);
                tracing::info!(%order_id, "payment confirmed and recorded");
                PaymentOutcome::Recorded { order_id, payment }
            }
            Err(e) => {
                metrics::counter!("payment_persistence_gaps_total").increment(1);
                tracing::warn!(
                    %order_id,
                    error = %e,
                    "payment confirmed but not stored; left for reconciliation"
                );
                PaymentOutcome::PendingReconciliation { order_id, payment }
            }
        };

        metrics::histogram!("payment_confirm_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Cancels the order and returns its stock after a refused payment.
    async fn compensate(&self, order_id: OrderId, code: &str, message: String) -> SagaError {
        metrics::counter!("payment_compensations_total").increment(1);

        match self.store.cancel_order(order_id).await {
            Ok(_) => {
                tracing::warn!(%order_id, code, %message, "payment failed; order cancelled and stock returned");
                SagaError::GatewayFailure {
                    code: code.to_string(),
                    message,
                }
            }
            Err(e) => {
                tracing::error!(%order_id, code, error = %e, "payment failed and compensation failed");
                SagaError::CompensationFailed {
                    order_id,
                    reason: format!("{code}: {e}"),
                }
            }
        }
    }

    pub async fn list_payments(&self) -> Result<Vec<Payment>> {
        Ok(self.store.list_payments().await?)
    }

    /// Looks a payment up at the gateway.
    pub async fn find_gateway_payment(&self, payment_key: &str) -> Result<GatewayPayment> {
        Ok(self.gateway.find_by_payment_key(payment_key).await?)
    }
}
