use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{FromRef, Request, State};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, StatusCode,
};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post, put},
    Router,
};
use common_auth::{TokenCodec, TokenConfig};
use common_http_errors::ERROR_CODE_HEADER;
use common_money::Money;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::auth_handlers::{login, register};
use crate::cart_handlers::{add_cart_item, get_cart};
use crate::checkout::CheckoutEngine;
use crate::config::ServiceConfig;
use crate::metrics::StorefrontMetrics;
use crate::models::Product;
use crate::order_handlers::{
    checkout, delete_order, get_order, list_my_orders, list_orders, update_order_status, update_payment_status,
};
use crate::product_handlers::{get_product, list_products};
use crate::profile_handlers::{delete_profile, get_profile, reset_password, set_role, update_profile};
use crate::storage::{with_timeout, MemoryStore, PostgresStore, StoreResult, Stores};

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub token_codec: Arc<TokenCodec>,
    pub checkout: Arc<CheckoutEngine>,
    pub metrics: StorefrontMetrics,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(stores: Stores, token_codec: Arc<TokenCodec>, config: ServiceConfig) -> anyhow::Result<Self> {
        let metrics = StorefrontMetrics::new().context("failed to register storefront metrics")?;
        let checkout = CheckoutEngine::new(&stores, config.max_line_quantity, config.store_timeout, metrics.clone());
        Ok(Self {
            stores,
            token_codec,
            checkout: Arc::new(checkout),
            metrics,
            config: Arc::new(config),
        })
    }

    /// Run a store call under the configured timeout.
    pub async fn timed<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        with_timeout(self.config.store_timeout, op, fut).await
    }
}

impl FromRef<AppState> for Arc<TokenCodec> {
    fn from_ref(state: &AppState) -> Self {
        state.token_codec.clone()
    }
}

pub fn build_token_codec_from_env() -> anyhow::Result<Arc<TokenCodec>> {
    let config = TokenConfig::from_env().context("failed to load token configuration")?;
    info!(
        issuer = %config.issuer,
        ttl_seconds = config.ttl.num_seconds(),
        alt_header = %config.alt_header,
        cookie = %config.cookie_name,
        "token codec initialised"
    );
    Ok(Arc::new(TokenCodec::new(config)))
}

/// Postgres when `DATABASE_URL` is set, otherwise the in-memory backend.
pub async fn build_stores(config: &ServiceConfig) -> anyhow::Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            store.migrate().await.context("failed to apply migrations")?;
            Ok(Stores::postgres(store))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
            let store = Arc::new(MemoryStore::new());
            if config.seed_demo_catalog {
                seed_demo_catalog(&store).await;
            }
            Ok(Stores::in_memory(store))
        }
    }
}

pub async fn seed_demo_catalog(store: &MemoryStore) {
    let demo = [
        ("Espresso beans 1kg", 2_400, "Dark roast, whole bean"),
        ("Pour-over kettle", 4_500, "Gooseneck, 1 litre"),
        ("Paper filters (100)", 650, "Size 02"),
    ];
    for (name, minor, description) in demo {
        let mut product = Product::new(name, Money::from_minor(minor));
        product.description = description.to_string();
        store.upsert_product(product).await;
    }
    info!(count = demo.len(), "seeded demo catalog");
}

/// Counts every error response by the code the handler stamped on it.
pub async fn http_error_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get(ERROR_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        state.metrics.http_error(code, status);
    }
    resp
}

pub async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {err}")).into_response(),
    }
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let alt_header = HeaderName::try_from(state.token_codec.config().alt_header.as_str())
        .unwrap_or_else(|_| HeaderName::from_static("x-access-token"));
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            state
                .config
                .cors_allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            alt_header,
            HeaderName::from_static("idempotency-key"),
        ])
        .allow_credentials(true)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state);

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/profile", get(get_profile).put(update_profile).delete(delete_profile))
        .route("/users/:id/role", put(set_role))
        .route("/users/:id/password", put(reset_password))
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
        .route("/cart/:slot", get(get_cart))
        .route("/cart/:slot/items", post(add_cart_item))
        .route("/checkout/:slot", post(checkout))
        .route("/orders", get(list_orders))
        .route("/orders/mine", get(list_my_orders))
        .route("/orders/:id", get(get_order).delete(delete_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/payment-status", put(update_payment_status))
        .layer(middleware::from_fn_with_state(state.clone(), http_error_metrics))
        .with_state(state)
        .layer(cors)
}
