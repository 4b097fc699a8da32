//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::ProductId;
use domain::InMemoryShopStore;
use lock::{InMemoryLockService, LockKey, LockService, RetryPolicy};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{EventPublisher, InMemoryPaymentGateway};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: Router,
    store: InMemoryShopStore,
    locks: InMemoryLockService,
    gateway: InMemoryPaymentGateway,
    publisher: EventPublisher,
}

impl TestApp {
    fn new() -> Self {
        Self::with_lock_settings(RetryPolicy::default(), Duration::from_secs(30))
    }

    fn with_lock_settings(policy: RetryPolicy, request_timeout: Duration) -> Self {
        let store = InMemoryShopStore::new();
        let locks = InMemoryLockService::new();
        let gateway = InMemoryPaymentGateway::new();
        let publisher = EventPublisher::new();

        let state = api::create_state(
            store.clone(),
            locks.clone(),
            gateway.clone(),
            publisher.clone(),
            policy,
            request_timeout,
        );
        let app = api::create_app(state, get_metrics_handle());

        Self {
            app,
            store,
            locks,
            gateway,
            publisher,
        }
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn register_member(&self) -> String {
        self.register_member_with_email("buyer@example.com").await
    }

    async fn register_member_with_email(&self, email: &str) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/members",
                Some(json!({ "email": email, "name": "Buyer" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn register_product(&self, price: i64, stock: u32) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/products",
                Some(json!({
                    "name": "Mechanical Keyboard",
                    "price": price,
                    "stock_quantity": stock,
                    "description": "tenkeyless"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn place_order(&self, member_id: &str, product_id: &str, quantity: u32) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/orders",
            Some(json!({
                "member_id": member_id,
                "product_id": product_id,
                "quantity": quantity
            })),
        )
        .await
    }

    async fn stock_of(&self, product_id: &str) -> u64 {
        let (status, body) = self.send("GET", &format!("/products/{product_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        body["stock_quantity"].as_u64().unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, body) = app.send("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();

    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_place_and_get_order() {
    let app = TestApp::new();
    let member_id = app.register_member().await;
    let product_id = app.register_product(15_000, 10).await;

    let (status, order) = app.place_order(&member_id, &product_id, 2).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "NEW");
    assert_eq!(order["total_amount"], 30_000);
    assert_eq!(order["total_quantity"], 2);
    assert_eq!(order["order_name"], "Mechanical Keyboard");
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
    assert_eq!(order["lines"][0]["order_price"], 15_000);
    assert_eq!(app.stock_of(&product_id).await, 8);

    let order_id = order["id"].as_str().unwrap();
    let (status, fetched) = app
        .send("GET", &format!("/orders/{order_id}?member_id={member_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["order_number"], order["order_number"]);
    assert_eq!(fetched["member_id"], member_id.as_str());
}

#[tokio::test]
async fn test_place_order_beyond_stock_is_conflict() {
    let app = TestApp::new();
    let member_id = app.register_member().await;
    let product_id = app.register_product(1_000, 1).await;

    let (status, body) = app.place_order(&member_id, &product_id, 2).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NOT_ENOUGH_STOCK");
    assert_eq!(app.stock_of(&product_id).await, 1);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_place_order_rejects_bad_input() {
    let app = TestApp::new();
    let member_id = app.register_member().await;
    let product_id = app.register_product(1_000, 5).await;

    let (status, body) = app.place_order(&member_id, &product_id, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ORDER");

    let (status, body) = app.place_order(&member_id, "not-a-uuid", 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = app
        .place_order(&member_id, &ProductId::new().to_string(), 1)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PRODUCT_NOT_FOUND");
}

#[tokio::test]
async fn test_place_order_with_unrepresentable_total() {
    let app = TestApp::new();
    let member_id = app.register_member().await;
    let product_id = app.register_product(i64::MAX / 2, 10).await;

    let (status, body) = app.place_order(&member_id, &product_id, 3).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ORDER");
    assert_eq!(app.stock_of(&product_id).await, 10);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = TestApp::new();
    let member_id = app.register_member().await;

    let (status, body) = app
        .send(
            "GET",
            &format!("/orders/{}?member_id={member_id}", common::OrderId::new()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn test_get_order_of_other_member_is_forbidden() {
    let app = TestApp::new();
    let owner = app.register_member().await;
    let stranger = app.register_member_with_email("stranger@example.com").await;
    let product_id = app.register_product(1_000, 5).await;
    let (_, order) = app.place_order(&owner, &product_id, 1).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, body) = app
        .send("GET", &format!("/orders/{order_id}?member_id={stranger}"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ORDER_MEMBER_MISMATCH");

    let (status, _) = app.send("GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_orders() {
    let app = TestApp::new();
    let member_id = app.register_member().await;
    let product_id = app.register_product(1_000, 20).await;
    let (_, small) = app.place_order(&member_id, &product_id, 1).await;
    let (_, large) = app.place_order(&member_id, &product_id, 5).await;
    app.send(
        "POST",
        &format!("/orders/{}/cancel", small["id"].as_str().unwrap()),
        Some(json!({ "member_id": member_id })),
    )
    .await;

    let (status, page) = app.send("GET", "/orders/search", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["page"], 0);
    assert_eq!(page["size"], 20);
    assert_eq!(page["items"][0]["id"], large["id"]);

    let (status, page) = app
        .send("GET", "/orders/search?status=NEW&min_amount=2000", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["total_amount"], 5_000);

    let (status, page) = app.send("GET", "/orders/search?year=2001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 0);

    let (status, body) = app
        .send(
            "GET",
            "/orders/search?from=2026-05-01T00:00:00Z&to=2026-04-01T00:00:00Z",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SEARCH");
}

#[tokio::test]
async fn test_order_stats_per_member() {
    let app = TestApp::new();
    let buyer = app.register_member().await;
    let other = app.register_member_with_email("other@example.com").await;
    let product_id = app.register_product(1_000, 20).await;
    app.place_order(&buyer, &product_id, 1).await;
    app.place_order(&buyer, &product_id, 3).await;
    app.place_order(&other, &product_id, 1).await;

    let (status, page) = app.send("GET", "/orders/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["member_id"], buyer.as_str());
    assert_eq!(page["items"][0]["email"], "buyer@example.com");
    assert_eq!(page["items"][0]["order_count"], 2);
    assert_eq!(page["items"][0]["total_amount"], 4_000);
    assert_eq!(page["items"][0]["average_amount"], 2_000.0);

    let (status, page) = app.send("GET", "/orders/stats?min_amount=2000", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["member_id"], buyer.as_str());
}

#[tokio::test]
async fn test_busy_product_lock_returns_service_unavailable() {
    let policy = RetryPolicy::new(
        2,
        Duration::from_millis(5),
        Duration::from_millis(10),
        Duration::from_secs(5),
    );
    let app = TestApp::with_lock_settings(policy, Duration::from_secs(30));
    let member_id = app.register_member().await;
    let product_id = app.register_product(1_000, 5).await;

    let key = LockKey::for_product(product_id.parse().unwrap());
    let held = app
        .locks
        .try_acquire(&key, Duration::ZERO, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let (status, body) = app.place_order(&member_id, &product_id, 1).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "ORDER_LOCK_FAILED");
    assert_eq!(app.stock_of(&product_id).await, 5);

    app.locks.release(&held).await.unwrap();
    let (status, _) = app.place_order(&member_id, &product_id, 1).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_request_timeout_aborts_lock_wait() {
    let policy = RetryPolicy::new(
        1_000,
        Duration::from_millis(5),
        Duration::from_millis(20),
        Duration::from_secs(5),
    );
    let app = TestApp::with_lock_settings(policy, Duration::from_millis(100));
    let member_id = app.register_member().await;
    let product_id = app.register_product(1_000, 5).await;

    let key = LockKey::for_product(product_id.parse().unwrap());
    let _held = app
        .locks
        .try_acquire(&key, Duration::ZERO, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let (status, body) = app.place_order(&member_id, &product_id, 1).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "ORDER_ERROR");
    assert_eq!(app.stock_of(&product_id).await, 5);
}

#[tokio::test]
async fn test_cancel_order_by_owner_restocks() {
    let app = TestApp::new();
    let member_id = app.register_member().await;
    let product_id = app.register_product(1_000, 5).await;
    let (_, order) = app.place_order(&member_id, &product_id, 3).await;
    let order_id = order["id"].as_str().unwrap();
    assert_eq!(app.stock_of(&product_id).await, 2);

    let (status, canceled) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/cancel"),
            Some(json!({ "member_id": member_id })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(canceled["status"], "CANCELED");
    assert_eq!(app.stock_of(&product_id).await, 5);

    // A second cancel is a no-op and never restocks twice.
    let (status, _) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/cancel"),
            Some(json!({ "member_id": member_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.stock_of(&product_id).await, 5);
}

#[tokio::test]
async fn test_cancel_order_by_other_member_is_forbidden() {
    let app = TestApp::new();
    let owner = app.register_member().await;
    let stranger = app.register_member().await;
    let product_id = app.register_product(1_000, 5).await;
    let (_, order) = app.place_order(&owner, &product_id, 1).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, body) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/cancel"),
            Some(json!({ "member_id": stranger })),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ORDER_MEMBER_MISMATCH");
    assert_eq!(app.stock_of(&product_id).await, 4);
}

#[tokio::test]
async fn test_checkout_and_confirm_payment() {
    let app = TestApp::new();
    let mut events = app.publisher.subscribe();
    let member_id = app.register_member().await;
    let product_id = app.register_product(12_500, 3).await;
    let (_, order) = app.place_order(&member_id, &product_id, 2).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, info) = app
        .send("POST", &format!("/orders/{order_id}/payment"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["totalAmount"], 25_000);
    assert_eq!(info["customerEmail"], "buyer@example.com");
    assert_eq!(info["orderName"], "Mechanical Keyboard");
    let encoded_order_id = info["orderId"].as_str().unwrap().to_string();

    let (status, confirmed) = app
        .send(
            "POST",
            "/payments/confirm",
            Some(json!({
                "paymentKey": "pk_test_1",
                "orderId": encoded_order_id,
                "amount": 25_000
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "COMPLETED");
    assert_eq!(confirmed["order_id"], order_id);
    assert_eq!(confirmed["payment"]["paymentKey"], "pk_test_1");

    let (_, completed) = app
        .send("GET", &format!("/orders/{order_id}?member_id={member_id}"), None)
        .await;
    assert_eq!(completed["status"], "COMPLETED");
    assert_eq!(completed["payment_key"], "pk_test_1");

    let (status, payments) = app.send("GET", "/payments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payments.as_array().unwrap().len(), 1);
    assert_eq!(payments[0]["status"], "DONE");
    assert_eq!(payments[0]["total_amount"], 25_000);

    let event = events.try_recv().unwrap();
    assert_eq!(event.order_id.to_string(), order_id);
    assert_eq!(event.email, "buyer@example.com");

    let (status, gateway_payment) = app.send("GET", "/payments/pk_test_1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gateway_payment["totalAmount"], 25_000);
}

#[tokio::test]
async fn test_rejected_payment_cancels_and_restocks() {
    let app = TestApp::new();
    let member_id = app.register_member().await;
    let product_id = app.register_product(5_000, 4).await;
    let (_, order) = app.place_order(&member_id, &product_id, 3).await;
    let order_id = order["id"].as_str().unwrap();
    let (_, info) = app
        .send("POST", &format!("/orders/{order_id}/payment"), None)
        .await;
    app.gateway
        .reject_confirmations("REJECT_CARD_COMPANY", "card declined");

    let (status, body) = app
        .send(
            "POST",
            "/payments/confirm",
            Some(json!({
                "paymentKey": "pk_declined",
                "orderId": info["orderId"],
                "amount": 15_000
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "REJECT_CARD_COMPANY");
    assert_eq!(body["message"], "card declined");

    let (_, canceled) = app
        .send("GET", &format!("/orders/{order_id}?member_id={member_id}"), None)
        .await;
    assert_eq!(canceled["status"], "CANCELED");
    assert_eq!(app.stock_of(&product_id).await, 4);
    assert_eq!(app.store.payment_count().await, 0);
}

#[tokio::test]
async fn test_confirm_with_undecodable_order_reference() {
    let app = TestApp::new();

    let (status, body) = app
        .send(
            "POST",
            "/payments/confirm",
            Some(json!({
                "paymentKey": "pk_bogus",
                "orderId": "%%%",
                "amount": 1_000
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ORDER_REFERENCE");
    assert_eq!(app.gateway.confirm_calls(), 0);
}

#[tokio::test]
async fn test_unknown_gateway_payment() {
    let app = TestApp::new();

    let (status, body) = app.send("GET", "/payments/pk_missing", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PAYMENT_NOT_FOUND");
}

#[tokio::test]
async fn test_concurrent_orders_never_oversell() {
    let app = Arc::new(TestApp::new());
    let member_id = app.register_member().await;
    let product_id = app.register_product(1_000, 5).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..30 {
        let app = app.clone();
        let member_id = member_id.clone();
        let product_id = product_id.clone();
        tasks.spawn(async move { app.place_order(&member_id, &product_id, 1).await.0 });
    }

    let mut created = 0;
    let mut conflicts = 0;
    while let Some(status) = tasks.join_next().await {
        match status.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(created, 5);
    assert_eq!(conflicts, 25);
    assert_eq!(app.stock_of(&product_id).await, 0);
}
