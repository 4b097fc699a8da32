//! External payment gateway contract.

mod http;
mod memory;

pub use http::HttpPaymentGateway;
pub use memory::InMemoryPaymentGateway;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId};
use domain::{Payment, PaymentStatus};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, SagaError};

/// Body of a confirm call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub payment_key: String,
    pub order_id: String,
    pub amount: Money,
}

/// A payment as the gateway reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPayment {
    pub payment_key: String,
    /// Encoded order id, see [`encode_order_id`].
    pub order_id: String,
    #[serde(default)]
    pub order_name: String,
    #[serde(default)]
    pub method: Option<String>,
    pub total_amount: Money,
    pub status: PaymentStatus,
    pub requested_at: DateTime<Utc>,
}

impl GatewayPayment {
    /// The local payment record for this gateway payment.
    pub fn to_payment(&self, order_id: OrderId, order_name: &str) -> Payment {
        Payment {
            id: PaymentId::new(),
            payment_key: self.payment_key.clone(),
            order_id,
            order_name: order_name.to_string(),
            method: self.method.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            total_amount: self.total_amount,
            status: self.status,
            requested_at: self.requested_at,
        }
    }
}

/// Client for the external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Confirms (captures) a payment the customer authorised.
    async fn confirm(
        &self,
        request: &ConfirmPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError>;

    /// Looks a payment up by its gateway key.
    async fn find_by_payment_key(&self, payment_key: &str)
    -> Result<GatewayPayment, GatewayError>;
}

/// The order id as shown to the gateway: URL-safe unpadded base64 of the
/// UUID's hyphenated form.
pub fn encode_order_id(order_id: OrderId) -> String {
    URL_SAFE_NO_PAD.encode(order_id.to_string())
}

pub fn decode_order_id(encoded: &str) -> Result<OrderId, SagaError> {
    let invalid = || SagaError::InvalidOrderReference(encoded.to_string());

    let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.parse().map_err(|_| invalid())
}
