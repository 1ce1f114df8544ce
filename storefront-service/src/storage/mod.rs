//! Storage seams for the storefront.
//!
//! Every collaborator is a trait object so handlers and the checkout engine
//! work the same against the in-memory backend and PostgreSQL. Uniqueness
//! (usernames, purchase ids, cart claims) is enforced by the store itself.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_http_errors::ApiError;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    Cart, CartClaim, CartError, CartSlot, CredentialRecord, CredentialUpdate, Order, OrderStatus, PaymentStatus, Product,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; the payload names it.
    #[error("unique constraint '{0}' violated")]
    Conflict(&'static str),
    /// A compare-and-set lost against a concurrent writer.
    #[error("record changed concurrently")]
    Stale,
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error("store call '{op}' timed out after {limit:?}")]
    Timeout { op: &'static str, limit: Duration },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

/// Storage failures that reach a handler unmapped are infrastructure
/// trouble, never the caller's fault.
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => ApiError::conflict("conflict", format!("{constraint} already exists")),
            StoreError::Stale => ApiError::conflict("conflict", "record changed concurrently; reload and retry"),
            StoreError::Cart(CartError::InvalidSlot(_)) => ApiError::bad_request("invalid_slot", "cart slot must be 1 or 2"),
            StoreError::Cart(err) => ApiError::bad_request("invalid_quantity", err.to_string()),
            StoreError::Timeout { op, limit } => {
                warn!(op, timeout_ms = limit.as_millis() as u64, "store call timed out");
                ApiError::Persistence { retryable: true }
            }
            StoreError::Unavailable(reason) => {
                warn!(error = %reason, "store unavailable");
                ApiError::Persistence { retryable: true }
            }
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with `Conflict("username")` when the username is taken.
    async fn create(&self, record: CredentialRecord) -> StoreResult<CredentialRecord>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CredentialRecord>>;
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<CredentialRecord>>;
    /// `Ok(None)` when no such account exists.
    async fn update(&self, id: Uuid, update: CredentialUpdate) -> StoreResult<Option<CredentialRecord>>;
    /// Removes the account and its carts. Orders are kept.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn list(&self) -> StoreResult<Vec<Product>>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get(&self, owner_id: Uuid, slot: CartSlot) -> StoreResult<Option<Cart>>;
    /// Creates the cart lazily and applies `delta` to one line atomically.
    async fn upsert_item(
        &self,
        owner_id: Uuid,
        slot: CartSlot,
        product_id: Uuid,
        delta: i64,
        cap: u32,
    ) -> StoreResult<Cart>;
    /// Clears the items only if the cart is still at `version`.
    async fn clear_if_version(&self, owner_id: Uuid, slot: CartSlot, version: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `Conflict("purchase_id")` or `Conflict("source_cart")`.
    async fn create(&self, order: Order) -> StoreResult<Order>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Order>>;
    async fn find_by_purchase_id(&self, purchase_id: &str) -> StoreResult<Option<Order>>;
    /// The order that consumed this cart version, if any.
    async fn find_by_source_cart(&self, claim: &CartClaim) -> StoreResult<Option<Order>>;
    async fn find_by_owner(&self, owner_id: Uuid) -> StoreResult<Vec<Order>>;
    async fn list_all(&self) -> StoreResult<Vec<Order>>;
    /// Compare-and-set on status. `Err(Stale)` if the status is no longer `expected`.
    async fn update_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> StoreResult<Option<Order>>;
    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> StoreResult<Option<Order>>;
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

/// The four collaborators the service needs, sharing one backend or not.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub products: Arc<dyn ProductCatalog>,
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
}

impl Stores {
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            credentials: store.clone(),
            products: store.clone(),
            carts: store.clone(),
            orders: store,
        }
    }

    pub fn postgres(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        Self {
            credentials: store.clone(),
            products: store.clone(),
            carts: store.clone(),
            orders: store,
        }
    }
}

/// Bound a store call. Dropping the inner future on timeout abandons the call.
pub async fn with_timeout<T, F>(limit: Duration, op: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { op, limit }),
    }
}
