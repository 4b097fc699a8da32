//! Payment confirmation and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Payment, ShopStore};
use lock::LockService;
use saga::{ConfirmPayment, GatewayError, GatewayPayment, PaymentGateway, PaymentOutcome, SagaError};
use serde::Serialize;

use super::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Serialize)]
pub struct ConfirmPaymentResponse {
    pub order_id: String,
    /// `COMPLETED`, or `PENDING` when the charge went through but is not
    /// stored yet.
    pub status: &'static str,
    pub payment: GatewayPayment,
}

impl From<PaymentOutcome> for ConfirmPaymentResponse {
    fn from(outcome: PaymentOutcome) -> Self {
        let status = if outcome.is_recorded() {
            "COMPLETED"
        } else {
            "PENDING"
        };
        Self {
            order_id: outcome.order_id().to_string(),
            status,
            payment: outcome.payment().clone(),
        }
    }
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub payment_key: String,
    pub order_id: String,
    pub order_name: String,
    pub method: String,
    pub total_amount: i64,
    pub status: &'static str,
    pub requested_at: String,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            payment_key: payment.payment_key,
            order_id: payment.order_id.to_string(),
            order_name: payment.order_name,
            method: payment.method,
            total_amount: payment.total_amount.amount(),
            status: payment.status.as_str(),
            requested_at: payment.requested_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /payments/confirm: confirm a payment the customer authorised.
///
/// A gateway rejection cancels the order and restocks before the error is
/// returned with the provider's code and message.
#[tracing::instrument(skip(state, req), fields(payment_key = %req.payment_key))]
pub async fn confirm<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Json(req): Json<ConfirmPayment>,
) -> Result<Json<ConfirmPaymentResponse>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let outcome = state.payments.confirm_payment(req).await?;
    Ok(Json(ConfirmPaymentResponse::from(outcome)))
}

/// GET /payments: every stored payment.
#[tracing::instrument(skip(state))]
pub async fn list<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let payments = state.payments.list_payments().await?;
    Ok(Json(payments.into_iter().map(PaymentResponse::from).collect()))
}

/// GET /payments/{payment_key}: the payment as the gateway reports it.
#[tracing::instrument(skip(state))]
pub async fn find_by_key<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(payment_key): Path<String>,
) -> Result<Json<GatewayPayment>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    match state.payments.find_gateway_payment(&payment_key).await {
        Ok(payment) => Ok(Json(payment)),
        Err(SagaError::Gateway(GatewayError::Rejected { status: 404, .. })) => {
            Err(ApiError::PaymentNotFound(payment_key))
        }
        Err(e) => Err(e.into()),
    }
}
