use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub const SERVICE_NAME: &str = "storefront-service";

#[derive(Clone)]
pub struct StorefrontMetrics {
    registry: Registry,
    http_errors: IntCounterVec,
    auth_rejections: IntCounterVec,
    login_attempts: IntCounterVec,
    checkout_outcomes: IntCounterVec,
    cart_clear_inconsistencies: IntCounter,
}

impl StorefrontMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_errors = IntCounterVec::new(
            Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
            &["service", "code", "status"],
        )?;
        registry.register(Box::new(http_errors.clone()))?;

        let auth_rejections = IntCounterVec::new(
            Opts::new("storefront_auth_rejections_total", "Requests rejected by the auth gate"),
            &["reason"],
        )?;
        registry.register(Box::new(auth_rejections.clone()))?;

        let login_attempts = IntCounterVec::new(
            Opts::new("storefront_login_attempts_total", "Count of login attempts grouped by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let checkout_outcomes = IntCounterVec::new(
            Opts::new("storefront_checkout_total", "Checkout attempts grouped by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(checkout_outcomes.clone()))?;

        let cart_clear_inconsistencies = IntCounter::new(
            "storefront_cart_clear_inconsistencies_total",
            "Orders created whose source cart could not be cleared",
        )?;
        registry.register(Box::new(cart_clear_inconsistencies.clone()))?;

        Ok(Self {
            registry,
            http_errors,
            auth_rejections,
            login_attempts,
            checkout_outcomes,
            cart_clear_inconsistencies,
        })
    }

    pub fn http_error(&self, code: &str, status: StatusCode) {
        self.http_errors
            .with_label_values(&[SERVICE_NAME, code, status.as_str()])
            .inc();
    }

    pub fn auth_rejected(&self, reason: &str) {
        self.auth_rejections.with_label_values(&[reason]).inc();
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn checkout(&self, outcome: &str) {
        self.checkout_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn cart_clear_inconsistency(&self) {
        self.cart_clear_inconsistencies.inc();
    }

    pub fn checkout_count(&self, outcome: &str) -> u64 {
        self.checkout_outcomes.with_label_values(&[outcome]).get()
    }

    pub fn cart_clear_inconsistency_count(&self) -> u64 {
        self.cart_clear_inconsistencies.get()
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
