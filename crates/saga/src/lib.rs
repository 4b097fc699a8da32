//! Payment confirmation saga and its recovery path.
//!
//! Confirming a payment is a compensating transaction around an external
//! gateway call:
//! 1. Call the gateway. On failure, cancel the order and return its stock.
//! 2. Record the gateway's payment key on the order.
//! 3. Persist the payment, mark the order completed and publish
//!    [`OrderCompletedEvent`].
//!
//! If step 3 fails the customer has already been charged, so the failure is
//! logged rather than reported. [`ReconciliationJob`] later finds such orders
//! by their recorded key and replays step 3.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod reconciliation;
pub mod state;

mod completion;

pub use coordinator::PaymentSaga;
pub use error::{GatewayError, SagaError};
pub use events::{
    EventPublisher, LoggingNotifier, Notifier, NotifyError, OrderCompletedEvent,
    spawn_notification_dispatcher,
};
pub use gateway::{
    ConfirmPaymentRequest, GatewayPayment, HttpPaymentGateway, InMemoryPaymentGateway,
    PaymentGateway, decode_order_id, encode_order_id,
};
pub use reconciliation::ReconciliationJob;
pub use state::{ConfirmPayment, OrderPaymentInfo, PaymentOutcome};
