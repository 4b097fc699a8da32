//! Payment gateway over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{ConfirmPaymentRequest, GatewayPayment, PaymentGateway};
use crate::error::GatewayError;

/// Attempts per call when the gateway cannot be reached.
pub const TRANSPORT_ATTEMPTS: u32 = 3;

/// Pause between transport retries.
pub const TRANSPORT_BACKOFF: Duration = Duration::from_millis(100);

/// Error body the provider returns with non-success statuses.
#[derive(Debug, Deserialize)]
struct ProviderError {
    code: String,
    message: String,
}

/// Gateway client speaking the provider's JSON API.
///
/// `POST {base}/confirm` confirms a payment and `GET {base}/{paymentKey}`
/// looks one up. The payment key is always a single percent-encoded path
/// segment. Requests authenticate with HTTP Basic, the secret key as user
/// name and an empty password.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: Url,
    authorization: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url: String = base_url.into();
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| GatewayError::Transport(format!("invalid base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Transport(format!(
                "base URL {base_url} cannot take a path"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            authorization: format!("Basic {}", STANDARD.encode(format!("{secret_key}:"))),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// The base URL with `segment` appended as one encoded path segment.
    fn endpoint(&self, segment: &str) -> Result<Url, GatewayError> {
        // The URL path builder silently drops these.
        if matches!(segment, "" | "." | "..") {
            return Err(GatewayError::InvalidPaymentKey(segment.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GatewayError::Transport(format!("base URL {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }

    /// Sends the request built by `build`, retrying connect and timeout
    /// failures, and decodes the response.
    async fn send<T, F>(&self, operation: &'static str, build: F) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 1;
        let response = loop {
            match build()
                .header(reqwest::header::AUTHORIZATION, &self.authorization)
                .send()
                .await
            {
                Ok(response) => break response,
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < TRANSPORT_ATTEMPTS => {
                    tracing::debug!(operation, attempt, error = %e, "gateway call failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(TRANSPORT_BACKOFF).await;
                }
                Err(e) => {
                    tracing::warn!(operation, attempt, error = %e, "gateway unreachable");
                    return Err(GatewayError::Transport(e.to_string()));
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ProviderError>(&body) {
            Ok(error) => (error.code, error.message),
            Err(_) => ("UNKNOWN_ERROR".to_string(), body),
        };
        tracing::info!(operation, status = status.as_u16(), %code, "gateway rejected request");
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, request), fields(payment_key = %request.payment_key))]
    async fn confirm(
        &self,
        request: &ConfirmPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let url = self.endpoint("confirm")?;
        self.send("confirm", || {
            self.client
                .post(url.clone())
                .header("Idempotency-Key", &request.payment_key)
                .json(request)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_payment_key(
        &self,
        payment_key: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let url = self.endpoint(payment_key)?;
        self.send("find_by_payment_key", || self.client.get(url.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use std::sync::Mutex;

    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use common::Money;
    use serde_json::{Value, json};

    use super::*;

    /// Bind to port 0 and return the base URL.
    async fn start_provider(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/payments")
    }

    fn payment_json(key: &str, amount: i64) -> Value {
        json!({
            "paymentKey": key,
            "orderId": "b3JkZXI",
            "orderName": "Keyboard",
            "method": "CARD",
            "totalAmount": amount,
            "status": "DONE",
            "requestedAt": "2024-02-13T12:17:57+09:00"
        })
    }

    fn gateway(base: &str) -> HttpPaymentGateway {
        HttpPaymentGateway::new(base, "test_sk", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_confirm_posts_json_with_basic_auth() {
        let app = Router::new().route(
            "/v1/payments/confirm",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let expected = format!("Basic {}", STANDARD.encode("test_sk:"));
                let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
                if authorization != Some(expected.as_str()) {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({"code": "UNAUTHORIZED_KEY", "message": "bad key"})),
                    );
                }
                let key = body["paymentKey"].as_str().unwrap_or_default().to_string();
                let amount = body["amount"].as_i64().unwrap_or_default();
                (StatusCode::OK, Json(payment_json(&key, amount)))
            }),
        );
        let base = start_provider(app).await;

        let payment = gateway(&base)
            .confirm(&ConfirmPaymentRequest {
                payment_key: "pk_http".into(),
                order_id: "b3JkZXI".into(),
                amount: Money::new(15000),
            })
            .await
            .unwrap();

        assert_eq!(payment.payment_key, "pk_http");
        assert_eq!(payment.total_amount, Money::new(15000));
    }

    #[tokio::test]
    async fn test_error_body_becomes_rejection() {
        let app = Router::new().route(
            "/v1/payments/{payment_key}",
            get(|Path(_key): Path<String>| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({"code": "NOT_FOUND_PAYMENT", "message": "no such payment"})),
                )
            }),
        );
        let base = start_provider(app).await;

        let err = gateway(&base).find_by_payment_key("pk_x").await.unwrap_err();

        match err {
            GatewayError::Rejected {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, "NOT_FOUND_PAYMENT");
                assert_eq!(message, "no such payment");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_find_by_payment_key() {
        let app = Router::new().route(
            "/v1/payments/{payment_key}",
            get(|Path(key): Path<String>| async move { Json(payment_json(&key, 700)) }),
        );
        let base = start_provider(app).await;

        let payment = gateway(&base).find_by_payment_key("pk_y").await.unwrap();
        assert_eq!(payment.payment_key, "pk_y");
        assert_eq!(payment.total_amount, Money::new(700));
    }

    #[tokio::test]
    async fn test_payment_key_stays_one_path_segment() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let recorder = Arc::clone(&seen);
        let admin_hits = Arc::new(AtomicUsize::new(0));
        let admin_counter = Arc::clone(&admin_hits);
        let app = Router::new()
            .route(
                "/v1/payments/{payment_key}",
                get(move |uri: Uri, Path(key): Path<String>| {
                    let recorder = Arc::clone(&recorder);
                    async move {
                        recorder.lock().unwrap().push(uri.to_string());
                        Json(payment_json(&key, 700))
                    }
                }),
            )
            .route(
                "/admin/secrets",
                get(move || {
                    let counter = Arc::clone(&admin_counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"secret": true}))
                    }
                }),
            );
        let base = start_provider(app).await;

        let key = "../../admin/secrets?x=1#frag";
        let payment = gateway(&base).find_by_payment_key(key).await.unwrap();

        assert_eq!(payment.payment_key, key);
        assert_eq!(admin_hits.load(Ordering::SeqCst), 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let requested = &seen[0];
        assert!(requested.starts_with("/v1/payments/"), "{requested}");
        let segment = &requested["/v1/payments/".len()..];
        assert!(!segment.contains('/'), "{requested}");
        assert!(!segment.contains('?'), "{requested}");
        assert!(!segment.contains('#'), "{requested}");
    }

    #[tokio::test]
    async fn test_dot_segment_keys_are_rejected() {
        let gateway = gateway("http://127.0.0.1:9/v1/payments");
        for key in ["", ".", ".."] {
            let err = gateway.find_by_payment_key(key).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidPaymentKey(_)), "{key:?}");
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let gateway = gateway("https://pay.example.com/v1/payments/");
        assert_eq!(
            gateway.endpoint("confirm").unwrap().as_str(),
            "https://pay.example.com/v1/payments/confirm"
        );
        assert_eq!(
            gateway.endpoint("pk/1").unwrap().as_str(),
            "https://pay.example.com/v1/payments/pk%2F1"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err =
            HttpPaymentGateway::new("not a url", "test_sk", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_then_surface_as_transport() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            "/v1/payments/{payment_key}",
            get(move |Path(key): Path<String>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Json(payment_json(&key, 1))
                }
            }),
        );
        let base = start_provider(app).await;
        let slow = HttpPaymentGateway::new(&base, "test_sk", Duration::from_millis(50)).unwrap();

        let err = slow.find_by_payment_key("pk_slow").await.unwrap_err();

        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(calls.load(Ordering::SeqCst), TRANSPORT_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = gateway(&format!("http://{addr}"))
            .find_by_payment_key("pk_z")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
