//! HTTP API server for the shop ordering service.
//!
//! Provides REST endpoints for catalog setup, order placement under
//! per-product locks, order search and statistics, payment confirmation
//! and payment lookup, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use domain::{OrderOrchestrator, OrderService, ShopStore};
use lock::{LockService, RetryPolicy, RetryingLockAcquirer};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{EventPublisher, PaymentGateway, PaymentSaga};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, L, G>(state: Arc<AppState<S, L, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/members", post(routes::catalog::register_member::<S, L, G>))
        .route("/products", post(routes::catalog::register_product::<S, L, G>))
        .route("/products/{id}", get(routes::catalog::get_product::<S, L, G>))
        .route("/orders", post(routes::orders::place::<S, L, G>))
        .route("/orders/search", get(routes::orders::search::<S, L, G>))
        .route("/orders/stats", get(routes::orders::stats::<S, L, G>))
        .route("/orders/{id}", get(routes::orders::get::<S, L, G>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S, L, G>))
        .route(
            "/orders/{id}/payment",
            post(routes::orders::prepare_payment::<S, L, G>),
        )
        .route("/payments", get(routes::payments::list::<S, L, G>))
        .route("/payments/confirm", post(routes::payments::confirm::<S, L, G>))
        .route(
            "/payments/{payment_key}",
            get(routes::payments::find_by_key::<S, L, G>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the order orchestrator and payment saga over one store.
///
/// `publisher` receives an event for every order the saga completes; the
/// caller decides who listens.
pub fn create_state<S, L, G>(
    store: S,
    lock_service: L,
    gateway: G,
    publisher: EventPublisher,
    policy: RetryPolicy,
    request_timeout: Duration,
) -> Arc<AppState<S, L, G>>
where
    S: ShopStore + Clone + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let orders = OrderOrchestrator::new(
        OrderService::new(store.clone()),
        RetryingLockAcquirer::new(lock_service, policy),
    );
    let payments = PaymentSaga::new(store, gateway, publisher);

    Arc::new(AppState {
        orders,
        payments,
        request_timeout,
    })
}
