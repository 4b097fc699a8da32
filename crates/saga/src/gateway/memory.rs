//! In-memory payment gateway.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use domain::PaymentStatus;

use super::{ConfirmPaymentRequest, GatewayPayment, PaymentGateway};
use crate::error::GatewayError;

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    payments: HashMap<String, GatewayPayment>,
    reject_confirm: Option<(String, String)>,
    unreachable: bool,
    confirm_calls: usize,
}

/// Gateway that approves every confirmation unless told otherwise.
///
/// Used by tests and when no gateway URL is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes confirmations fail with the given provider code and message.
    pub fn reject_confirmations(&self, code: &str, message: &str) {
        if let Ok(mut state) = self.state.write() {
            state.reject_confirm = Some((code.to_string(), message.to_string()));
        }
    }

    pub fn approve_confirmations(&self) {
        if let Ok(mut state) = self.state.write() {
            state.reject_confirm = None;
        }
    }

    /// Makes every call fail as a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.unreachable = unreachable;
        }
    }

    /// Records a payment as if it had been confirmed out of band.
    pub fn insert_payment(&self, payment: GatewayPayment) {
        if let Ok(mut state) = self.state.write() {
            state.payments.insert(payment.payment_key.clone(), payment);
        }
    }

    pub fn confirm_calls(&self) -> usize {
        self.state.read().map(|state| state.confirm_calls).unwrap_or(0)
    }

    pub fn payment_count(&self) -> usize {
        self.state.read().map(|state| state.payments.len()).unwrap_or(0)
    }

    fn poisoned() -> GatewayError {
        GatewayError::Transport("gateway state poisoned".to_string())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn confirm(
        &self,
        request: &ConfirmPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        state.confirm_calls += 1;

        if state.unreachable {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        if let Some((code, message)) = &state.reject_confirm {
            return Err(GatewayError::Rejected {
                status: 400,
                code: code.clone(),
                message: message.clone(),
            });
        }
        if let Some(existing) = state.payments.get(&request.payment_key) {
            return Err(GatewayError::Rejected {
                status: 400,
                code: "ALREADY_PROCESSED_PAYMENT".to_string(),
                message: format!("payment {} was already confirmed", existing.payment_key),
            });
        }

        let payment = GatewayPayment {
            payment_key: request.payment_key.clone(),
            order_id: request.order_id.clone(),
            order_name: String::new(),
            method: Some("CARD".to_string()),
            total_amount: request.amount,
            status: PaymentStatus::Done,
            requested_at: Utc::now(),
        };
        state
            .payments
            .insert(payment.payment_key.clone(), payment.clone());
        Ok(payment)
    }

    async fn find_by_payment_key(
        &self,
        payment_key: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;

        if state.unreachable {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        state
            .payments
            .get(payment_key)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                status: 404,
                code: "NOT_FOUND_PAYMENT".to_string(),
                message: format!("no payment with key {payment_key}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use common::Money;

    use super::*;

    fn request(key: &str) -> ConfirmPaymentRequest {
        ConfirmPaymentRequest {
            payment_key: key.to_string(),
            order_id: "b3JkZXI".to_string(),
            amount: Money::new(5000),
        }
    }

    #[tokio::test]
    async fn test_confirm_then_find() {
        let gateway = InMemoryPaymentGateway::new();

        let confirmed = gateway.confirm(&request("pk_1")).await.unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Done);
        assert_eq!(confirmed.total_amount, Money::new(5000));

        let found = gateway.find_by_payment_key("pk_1").await.unwrap();
        assert_eq!(found, confirmed);
        assert_eq!(gateway.confirm_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejection_carries_code_and_message() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.reject_confirmations("REJECT_CARD_COMPANY", "card declined");

        let err = gateway.confirm(&request("pk_1")).await.unwrap_err();
        assert_eq!(err.code(), "REJECT_CARD_COMPANY");
        assert_eq!(err.message(), "card declined");
        assert_eq!(gateway.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_second_confirm_of_same_key_is_rejected() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.confirm(&request("pk_1")).await.unwrap();

        let err = gateway.confirm(&request("pk_1")).await.unwrap_err();
        assert_eq!(err.code(), "ALREADY_PROCESSED_PAYMENT");
    }

    #[tokio::test]
    async fn test_unreachable_and_unknown_key() {
        let gateway = InMemoryPaymentGateway::new();

        let err = gateway.find_by_payment_key("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { status: 404, .. }));

        gateway.set_unreachable(true);
        let err = gateway.confirm(&request("pk_1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
