//! Payments recorded after the gateway confirmed a charge.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

/// Gateway-side state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Ready,
    InProgress,
    WaitingForDeposit,
    Done,
    Canceled,
    PartialCanceled,
    Aborted,
    Expired,
    #[serde(other)]
    Unknown,
}

impl PaymentStatus {
    /// Whether the gateway has actually taken the money.
    pub fn is_done(&self) -> bool {
        matches!(self, PaymentStatus::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Ready => "READY",
            PaymentStatus::InProgress => "IN_PROGRESS",
            PaymentStatus::WaitingForDeposit => "WAITING_FOR_DEPOSIT",
            PaymentStatus::Done => "DONE",
            PaymentStatus::Canceled => "CANCELED",
            PaymentStatus::PartialCanceled => "PARTIAL_CANCELED",
            PaymentStatus::Aborted => "ABORTED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "READY" => PaymentStatus::Ready,
            "IN_PROGRESS" => PaymentStatus::InProgress,
            "WAITING_FOR_DEPOSIT" => PaymentStatus::WaitingForDeposit,
            "DONE" => PaymentStatus::Done,
            "CANCELED" => PaymentStatus::Canceled,
            "PARTIAL_CANCELED" => PaymentStatus::PartialCanceled,
            "ABORTED" => PaymentStatus::Aborted,
            "EXPIRED" => PaymentStatus::Expired,
            _ => PaymentStatus::Unknown,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A confirmed payment, linked one-to-one to its order.
///
/// Its existence is what proves the order was paid; `payment_key` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Opaque reference issued by the gateway.
    pub payment_key: String,
    pub order_id: OrderId,
    pub order_name: String,
    pub method: String,
    pub total_amount: Money,
    pub status: PaymentStatus,
    pub requested_at: DateTime<Utc>,
}
