//! Final step of the payment saga, shared with reconciliation.

use domain::{Order, ShopStore, StoreError};

use crate::events::{EventPublisher, OrderCompletedEvent};
use crate::gateway::GatewayPayment;

/// Stores the payment, completes the order and, once that has committed,
/// publishes the completion event.
///
/// Returns `false` if the payment was already stored; no event is published
/// again in that case.
pub(crate) async fn record_payment<S: ShopStore>(
    store: &S,
    publisher: &EventPublisher,
    order: &Order,
    payment: &GatewayPayment,
) -> Result<bool, StoreError> {
    let record = payment.to_payment(order.id(), order.order_name());
    let inserted = store.complete_payment(&record).await?;

    if inserted {
        publisher.publish(OrderCompletedEvent::new(
            order.id(),
            order.email(),
            order.order_name(),
        ));
    }
    Ok(inserted)
}
