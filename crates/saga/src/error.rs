//! Saga and gateway error types.

use common::OrderId;
use domain::{OrderError, StoreError};
use thiserror::Error;

/// Errors returned by the payment gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway answered with a non-success status.
    #[error("Gateway rejected request ({status}): {code} {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The gateway could not be reached after all retries.
    #[error("Gateway unreachable: {0}")]
    Transport(String),

    /// The gateway answered with a body we could not read.
    #[error("Unexpected gateway response: {0}")]
    Decode(String),

    /// The payment key cannot name a gateway payment.
    #[error("Invalid payment key: {0:?}")]
    InvalidPaymentKey(String),
}

impl GatewayError {
    /// Machine-readable code, as supplied by the gateway when it gave one.
    pub fn code(&self) -> &str {
        match self {
            GatewayError::Rejected { code, .. } => code,
            GatewayError::Transport(_) => "GATEWAY_UNAVAILABLE",
            GatewayError::Decode(_) => "GATEWAY_ERROR",
            GatewayError::InvalidPaymentKey(_) => "INVALID_PAYMENT_KEY",
        }
    }

    pub fn message(&self) -> String {
        match self {
            GatewayError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors that can occur while confirming or reconciling payments.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The gateway refused the payment; the order has been cancelled and its
    /// stock returned.
    #[error("Payment failed: {code} {message}")]
    GatewayFailure { code: String, message: String },

    /// The gateway refused the payment and cancelling the order failed too.
    #[error("Compensation for order {order_id} failed: {reason}")]
    CompensationFailed { order_id: OrderId, reason: String },

    /// The encoded order id could not be decoded.
    #[error("Invalid order reference: {0}")]
    InvalidOrderReference(String),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl SagaError {
    pub fn code(&self) -> &str {
        match self {
            SagaError::GatewayFailure { code, .. } => code,
            SagaError::CompensationFailed { .. } => "ORDER_ERROR",
            SagaError::InvalidOrderReference(_) => "INVALID_ORDER_REFERENCE",
            SagaError::Order(e) => e.code(),
            SagaError::Store(_) => "ORDER_ERROR",
            SagaError::Gateway(e) => e.code(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
