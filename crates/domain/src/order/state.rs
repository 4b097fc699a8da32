//! Order status machine.

use serde::{Deserialize, Serialize};

/// Where an order is in its lifecycle.
///
/// ```text
/// New ──► PaymentPending ──► Completed
///  │            │
///  └────────────┴──► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Stock is taken and the order is persisted.
    #[default]
    New,

    /// A payment has been prepared or a payment key recorded.
    PaymentPending,

    /// A payment record exists for the order.
    Completed,

    /// The order was cancelled and its stock returned.
    Canceled,
}

impl OrderStatus {
    /// Whether a payment may be prepared or a payment key recorded.
    pub fn can_await_payment(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PaymentPending)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::PaymentPending)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }

    /// The stored representation, also used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PaymentPending => "PAYMENT_PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(OrderStatus::New),
            "PAYMENT_PENDING" => Some(OrderStatus::PaymentPending),
            "COMPLETED" => Some(OrderStatus::Completed),
            "CANCELED" => Some(OrderStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
