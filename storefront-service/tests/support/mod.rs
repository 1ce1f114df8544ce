#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use common_auth::{Role, TokenCodec, TokenConfig};
use common_money::Money;
use http_body_util::BodyExt;
use serde_json::Value;
use storefront_service::config::ServiceConfig;
use storefront_service::models::{CredentialRecord, Product, Profile};
use storefront_service::storage::{CredentialStore, MemoryStore, Stores};
use storefront_service::{build_router, AppState};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &[u8] = b"storefront-test-secret-0123456789abcdef";
pub const TEST_ISSUER: &str = "storefront-test";

pub fn test_codec() -> Arc<TokenCodec> {
    let config = TokenConfig::new(TEST_SECRET.to_vec(), TEST_ISSUER).expect("token config");
    Arc::new(TokenCodec::new(config))
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        store_timeout: Duration::from_millis(150),
        ..ServiceConfig::default()
    }
}

pub struct TestApp {
    pub state: AppState,
    pub memory: Arc<MemoryStore>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_stores(|_, stores| stores)
    }

    /// Lets a test swap individual collaborators for instrumented ones while
    /// the rest stay on the shared in-memory backend.
    pub fn with_stores(customize: impl FnOnce(Arc<MemoryStore>, Stores) -> Stores) -> Self {
        let memory = Arc::new(MemoryStore::new());
        let stores = customize(memory.clone(), Stores::in_memory(memory.clone()));
        let state = AppState::new(stores, test_codec(), test_config()).expect("app state");
        let router = build_router(state.clone());
        Self { state, memory, router }
    }

    pub async fn seed_user(&self, username: &str, role: Role, profile: Profile) -> CredentialRecord {
        let record = CredentialRecord::new(username, profile).with_role(role);
        CredentialStore::create(self.memory.as_ref(), record)
            .await
            .expect("seed user")
    }

    /// A user whose profile is complete enough to check out.
    pub async fn seed_shopper(&self, username: &str) -> CredentialRecord {
        self.seed_user(username, Role::User, shipping_profile()).await
    }

    pub async fn seed_product(&self, name: &str, minor: i64) -> Product {
        let product = Product::new(name, Money::from_minor(minor));
        self.memory.upsert_product(product.clone()).await;
        product
    }

    pub fn token_for(&self, record: &CredentialRecord) -> String {
        self.state
            .token_codec
            .issue(record.id, record.role)
            .expect("issue token")
            .token
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.expect("router call");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("response body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse { status, headers, body }
    }

    pub async fn add_item(&self, token: &str, slot: u8, product_id: Uuid, quantity: i64) -> TestResponse {
        self.send(request(
            "POST",
            &format!("/cart/{slot}/items"),
            Some(token),
            Some(serde_json::json!({ "productId": product_id, "quantity": quantity })),
        ))
        .await
    }

    pub async fn checkout(&self, token: &str, slot: u8, idempotency_key: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/checkout/{slot}"))
            .header("authorization", format!("Bearer {token}"));
        if let Some(key) = idempotency_key {
            builder = builder.header("idempotency-key", key);
        }
        self.send(builder.body(Body::empty()).expect("request")).await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn error_code(&self) -> Option<&str> {
        self.headers.get("x-error-code").and_then(|v| v.to_str().ok())
    }
}

pub fn shipping_profile() -> Profile {
    Profile {
        first_name: "Ada".into(),
        last_name: "Shopper".into(),
        address: "1 Market Street".into(),
        phone1: "555-0100".into(),
        phone2: String::new(),
        email: "ada@example.com".into(),
    }
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}
