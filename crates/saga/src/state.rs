//! Inputs and outcomes of the payment saga.

use common::{Money, OrderId};
use domain::{Member, Order};
use serde::{Deserialize, Serialize};

use crate::gateway::{GatewayPayment, encode_order_id};

/// A client's request to confirm a payment authorised in the payment widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPayment {
    pub payment_key: String,
    /// The encoded order id the widget was given, see [`encode_order_id`].
    pub order_id: String,
    pub amount: Money,
}

/// What the payment widget needs to start a payment for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaymentInfo {
    pub order_id: String,
    pub order_name: String,
    pub total_amount: Money,
    pub customer_email: String,
    pub customer_name: String,
}

impl OrderPaymentInfo {
    pub fn new(order: &Order, member: &Member) -> Self {
        Self {
            order_id: encode_order_id(order.id()),
            order_name: order.order_name().to_string(),
            total_amount: order.total_amount(),
            customer_email: member.email.clone(),
            customer_name: member.name.clone(),
        }
    }
}

/// Result of a payment the gateway accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The payment is stored and the order completed.
    Recorded {
        order_id: OrderId,
        payment: GatewayPayment,
    },

    /// The customer was charged but the payment could not be stored yet; the
    /// reconciliation job will finish it.
    PendingReconciliation {
        order_id: OrderId,
        payment: GatewayPayment,
    },
}

impl PaymentOutcome {
    pub fn payment(&self) -> &GatewayPayment {
        match self {
            PaymentOutcome::Recorded { payment, .. }
            | PaymentOutcome::PendingReconciliation { payment, .. } => payment,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            PaymentOutcome::Recorded { order_id, .. }
            | PaymentOutcome::PendingReconciliation { order_id, .. } => *order_id,
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, PaymentOutcome::Recorded { .. })
    }
}
