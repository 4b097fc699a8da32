//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use domain::{InMemoryShopStore, ShopStore};
use lock::{InMemoryLockService, LockService, PostgresLockService};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    EventPublisher, HttpPaymentGateway, InMemoryPaymentGateway, LoggingNotifier, PaymentGateway,
    ReconciliationJob, spawn_notification_dispatcher,
};
use sqlx::postgres::PgPoolOptions;
use store::PostgresShopStore;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick storage and lock backends
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresShopStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres storage and lease locks");

            with_gateway(config, metrics_handle, store, PostgresLockService::new(pool)).await;
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set, using in-memory storage and locks; run a single instance only"
            );
            with_gateway(
                config,
                metrics_handle,
                InMemoryShopStore::new(),
                InMemoryLockService::new(),
            )
            .await;
        }
    }
}

/// Picks the payment gateway client, then runs the server.
async fn with_gateway<S, L>(config: Config, metrics_handle: PrometheusHandle, store: S, lock_service: L)
where
    S: ShopStore + Clone + 'static,
    L: LockService + Clone + 'static,
{
    match config.payment_gateway_url.clone() {
        Some(url) => {
            let gateway = HttpPaymentGateway::new(
                url,
                &config.payment_gateway_secret_key,
                config.request_timeout(),
            )
            .expect("failed to build payment gateway client");
            tracing::info!(base_url = gateway.base_url(), "using HTTP payment gateway");

            run(config, metrics_handle, store, lock_service, gateway).await;
        }
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set, using in-memory payment gateway");
            run(
                config,
                metrics_handle,
                store,
                lock_service,
                InMemoryPaymentGateway::new(),
            )
            .await;
        }
    }
}

async fn run<S, L, G>(
    config: Config,
    metrics_handle: PrometheusHandle,
    store: S,
    lock_service: L,
    gateway: G,
) where
    S: ShopStore + Clone + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + Clone + 'static,
{
    // 4. Background work: notifications and reconciliation
    let publisher = EventPublisher::new();
    let dispatcher = spawn_notification_dispatcher(&publisher, LoggingNotifier);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let reconciliation = Arc::new(ReconciliationJob::new(
        store.clone(),
        gateway.clone(),
        publisher.clone(),
    ));
    let reconciliation_task = reconciliation.spawn(config.reconciliation_interval(), async move {
        let _ = shutdown_rx.changed().await;
    });

    // 5. Build the application
    let state = api::create_state(
        store,
        lock_service,
        gateway,
        publisher,
        config.retry_policy(),
        config.request_timeout(),
    );
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop background work; the dispatcher drains once every publisher is gone
    let _ = shutdown_tx.send(true);
    let _ = reconciliation_task.await;
    let _ = dispatcher.await;

    tracing::info!("server shut down gracefully");
}
