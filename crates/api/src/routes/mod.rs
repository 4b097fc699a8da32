//! HTTP handlers and the state they share.

pub mod catalog;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use std::str::FromStr;
use std::time::Duration;

use domain::{OrderOrchestrator, ShopStore};
use lock::LockService;
use saga::{PaymentGateway, PaymentSaga};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
///
/// The order orchestrator and the payment saga work on clones of the same
/// store.
pub struct AppState<S, L, G>
where
    S: ShopStore,
    L: LockService + Clone + 'static,
    G: PaymentGateway,
{
    pub orders: OrderOrchestrator<S, L>,
    pub payments: PaymentSaga<S, G>,
    /// How long an order request may wait for its product lock.
    pub request_timeout: Duration,
}

impl<S, L, G> AppState<S, L, G>
where
    S: ShopStore,
    L: LockService + Clone + 'static,
    G: PaymentGateway,
{
    pub fn store(&self) -> &S {
        self.orders.orders().store()
    }
}

fn parse_id<T>(kind: &str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {kind} id '{raw}': {e}")))
}
