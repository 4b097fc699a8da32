//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{OrderError, StoreError};
use saga::{GatewayError, SagaError};

/// API-level error type that maps to HTTP responses.
///
/// Every response body is `{ "code": ..., "message": ... }`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed input the handler rejected before calling a service.
    BadRequest(String),
    /// The gateway has no payment under the given key.
    PaymentNotFound(String),
    /// Ordering error.
    Order(OrderError),
    /// Payment saga error.
    Saga(SagaError),
    /// Storage error outside of an order operation.
    Store(StoreError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST".into(), msg.clone()),
            ApiError::PaymentNotFound(key) => (
                StatusCode::NOT_FOUND,
                "PAYMENT_NOT_FOUND".into(),
                format!("Payment not found: {key}"),
            ),
            ApiError::Order(err) => (order_status(err), err.code().into(), err.to_string()),
            ApiError::Saga(err) => saga_parts(err),
            ApiError::Store(err) => (store_status(err), "ORDER_ERROR".into(), err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(%code, error = %message, "request failed");
        } else {
            tracing::debug!(%code, error = %message, "request rejected");
        }

        let body = serde_json::json!({ "code": code, "message": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::MemberNotFound(_)
        | OrderError::ProductNotFound(_)
        | OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::InsufficientStock { .. } | OrderError::InvalidStateTransition { .. } => {
            StatusCode::CONFLICT
        }
        OrderError::InvalidQuantity { .. }
        | OrderError::NoLines
        | OrderError::AmountOverflow
        | OrderError::InvalidSearch(_) => StatusCode::BAD_REQUEST,
        OrderError::OrderMemberMismatch { .. } => StatusCode::FORBIDDEN,
        OrderError::LockAcquisitionExhausted { .. } | OrderError::Lock(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OrderError::OrderProcessingAborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        OrderError::Store(err) => store_status(err),
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::StockConflict { .. }
        | StoreError::StaleState { .. }
        | StoreError::DuplicatePayment { .. } => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn saga_parts(err: &SagaError) -> (StatusCode, String, String) {
    match err {
        SagaError::GatewayFailure { code, message } => {
            (StatusCode::BAD_REQUEST, code.clone(), message.clone())
        }
        SagaError::InvalidOrderReference(_) => {
            (StatusCode::BAD_REQUEST, err.code().into(), err.to_string())
        }
        SagaError::CompensationFailed { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            err.code().into(),
            err.to_string(),
        ),
        SagaError::Order(inner) => (order_status(inner), inner.code().into(), inner.to_string()),
        SagaError::Store(inner) => (store_status(inner), err.code().into(), inner.to_string()),
        SagaError::Gateway(inner) => (gateway_status(inner), inner.code().into(), inner.message()),
    }
}

fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Rejected { status: 404, .. } => StatusCode::NOT_FOUND,
        GatewayError::Rejected { .. } | GatewayError::InvalidPaymentKey(_) => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Decode(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}
