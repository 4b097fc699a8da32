//! Order completion events and their notification dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffered events per subscriber before the slowest one starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Published once an order's payment has been durably stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompletedEvent {
    pub order_id: OrderId,
    pub email: String,
    pub order_name: String,
    pub completed_at: DateTime<Utc>,
}

impl OrderCompletedEvent {
    pub fn new(order_id: OrderId, email: impl Into<String>, order_name: impl Into<String>) -> Self {
        Self {
            order_id,
            email: email.into(),
            order_name: order_name.into(),
            completed_at: Utc::now(),
        }
    }
}

/// Fan-out of [`OrderCompletedEvent`]s to in-process listeners.
///
/// Publishing never blocks and never fails the caller; with no subscriber the
/// event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<OrderCompletedEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderCompletedEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: OrderCompletedEvent) {
        let order_id = event.order_id;
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(%order_id, receivers, "order completed event published"),
            Err(_) => tracing::debug!(%order_id, "order completed event had no listeners"),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure to deliver a notification.
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers completion notices to customers, e.g. by email.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_completed(&self, event: &OrderCompletedEvent) -> Result<(), NotifyError>;
}

/// Notifier that only writes the notice to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn order_completed(&self, event: &OrderCompletedEvent) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %event.order_id,
            email = %event.email,
            order_name = %event.order_name,
            "order completion notice"
        );
        Ok(())
    }
}

/// Feeds every published event to `notifier` until the publisher side is
/// dropped. Notifier errors are logged and never reach the publisher.
pub fn spawn_notification_dispatcher<N>(publisher: &EventPublisher, notifier: N) -> JoinHandle<()>
where
    N: Notifier + 'static,
{
    let mut receiver = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = notifier.order_completed(&event).await {
                        tracing::error!(order_id = %event.order_id, error = %e, "order notification failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification dispatcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
