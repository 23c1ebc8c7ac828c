//! Shared harness: router over the in-memory store and a scripted provider.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use stk_payments_backend::api::app_router;
use stk_payments_backend::config::{MpesaConfig, MpesaEnvironment, SANDBOX_BASE_URL};
use stk_payments_backend::database::memory::InMemoryPaymentStore;
use stk_payments_backend::payments::error::{PaymentError, PaymentResult};
use stk_payments_backend::payments::provider::StkPushProvider;
use stk_payments_backend::payments::types::{StkPushRequest, StkPushResponse};

pub enum PushBehaviour {
    Accept(Value),
    Reject { status: u16, body: Value },
}

pub struct MockProvider {
    pub auth_ok: bool,
    pub push: PushBehaviour,
    pub token_calls: AtomicUsize,
    pub pushes: Mutex<Vec<StkPushRequest>>,
}

impl MockProvider {
    pub fn accepting(checkout_id: &str) -> Self {
        Self {
            auth_ok: true,
            push: PushBehaviour::Accept(json!({
                "MerchantRequestID": format!("mr_{}", checkout_id),
                "CheckoutRequestID": checkout_id,
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
                "CustomerMessage": "Success. Request accepted for processing"
            })),
            token_calls: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_auth() -> Self {
        Self {
            auth_ok: false,
            ..Self::accepting("ws_unused")
        }
    }

    pub fn rejecting(status: u16, body: Value) -> Self {
        Self {
            push: PushBehaviour::Reject { status, body },
            ..Self::accepting("ws_unused")
        }
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }
}

#[async_trait]
impl StkPushProvider for MockProvider {
    async fn get_access_token(&self) -> PaymentResult<String> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.auth_ok {
            Ok("mock-access-token".to_string())
        } else {
            Err(PaymentError::AuthFailure {
                status: Some(400),
                body: r#"{"errorMessage":"Invalid Authentication passed"}"#.to_string(),
            })
        }
    }

    async fn initiate_push(
        &self,
        _access_token: &str,
        request: &StkPushRequest,
    ) -> PaymentResult<StkPushResponse> {
        self.pushes.lock().unwrap().push(request.clone());
        match &self.push {
            PushBehaviour::Accept(body) => Ok(StkPushResponse::from_raw(body.clone())),
            PushBehaviour::Reject { status, body } => Err(PaymentError::PushFailure {
                status: Some(*status),
                body: body.clone(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

pub fn mpesa_config() -> MpesaConfig {
    MpesaConfig {
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://example.com/mpesa/callback".to_string(),
        environment: MpesaEnvironment::Sandbox,
        base_url: SANDBOX_BASE_URL.to_string(),
        timeout_secs: 30,
    }
}

pub struct TestApp {
    pub router: Router,
    pub provider: Arc<MockProvider>,
    pub store: Arc<InMemoryPaymentStore>,
}

impl TestApp {
    pub fn new(provider: MockProvider) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryPaymentStore::new());
        let router = app_router(provider.clone(), store.clone(), Arc::new(mpesa_config()));
        Self {
            router,
            provider,
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_raw(&self, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body.to_string()).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

pub fn callback(stk_callback: Value) -> Value {
    json!({ "Body": { "stkCallback": stk_callback } })
}

/// Amounts serialize as decimal strings; accept numbers too.
pub fn amount_of(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::String(s) => BigDecimal::from_str(s).ok(),
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}
