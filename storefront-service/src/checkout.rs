//! Cart-to-order conversion.
//!
//! Every business rule is checked before the first write. The order is
//! written before the cart is cleared; if the clear fails afterwards the
//! order stands and the stale cart is left for reconciliation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common_http_errors::ApiError;
use common_money::sum_lines;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gate::Principal;
use crate::metrics::StorefrontMetrics;
use crate::models::{BuyerSnapshot, CartClaim, CartSlot, Order, OrderLine, OrderStatus, PaymentStatus};
use crate::storage::{with_timeout, CartStore, OrderStore, ProductCatalog, StoreError, Stores};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("profile is missing an address or primary phone")]
    IncompleteProfile,
    #[error("cart is empty")]
    EmptyCart,
    #[error("line for product {product_id} has invalid quantity {quantity}")]
    InvalidQuantity { product_id: Uuid, quantity: u32 },
    #[error("order total overflows")]
    TotalOverflow,
    #[error("product {product_id} is no longer available")]
    ProductUnavailable { product_id: Uuid },
    #[error("purchase {purchase_id} already exists")]
    DuplicatePurchase { purchase_id: String },
    /// `retryable` is false when the order write may already have landed.
    #[error("persistence failure: {source}")]
    Persistence { retryable: bool, source: StoreError },
}

impl CheckoutError {
    pub fn outcome(&self) -> &'static str {
        match self {
            CheckoutError::IncompleteProfile => "incomplete_profile",
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::InvalidQuantity { .. } | CheckoutError::TotalOverflow => "invalid_quantity",
            CheckoutError::ProductUnavailable { .. } => "product_unavailable",
            CheckoutError::DuplicatePurchase { .. } => "duplicate_purchase",
            CheckoutError::Persistence { .. } => "persistence_error",
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(source: StoreError) -> Self {
        CheckoutError::Persistence { retryable: true, source }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::IncompleteProfile => ApiError::bad_request(
                "incomplete_profile",
                "An address and primary phone number are required before checkout",
            ),
            CheckoutError::EmptyCart => ApiError::bad_request("empty_cart", "The cart has no items"),
            err @ (CheckoutError::InvalidQuantity { .. } | CheckoutError::TotalOverflow) => {
                ApiError::bad_request("invalid_quantity", err.to_string())
            }
            CheckoutError::ProductUnavailable { .. } => ApiError::not_found("product_unavailable"),
            CheckoutError::DuplicatePurchase { purchase_id } => ApiError::conflict(
                "duplicate_purchase",
                format!("This purchase has already been placed as {purchase_id}"),
            ),
            CheckoutError::Persistence { retryable, source } => {
                warn!(error = %source, retryable, "checkout persistence failure");
                ApiError::Persistence { retryable }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub purchase_id: String,
    pub order_id: Uuid,
}

/// `ORD-` plus 32 hex digits. A client idempotency key maps to the same id
/// for the same user every time; without one the id is time-ordered.
pub fn purchase_id_for(owner_id: Uuid, idempotency_key: Option<&str>) -> String {
    let id = match idempotency_key {
        Some(key) => Uuid::new_v5(&owner_id, key.as_bytes()),
        None => Uuid::now_v7(),
    };
    format!("ORD-{}", id.simple())
}

pub struct CheckoutEngine {
    carts: Arc<dyn CartStore>,
    products: Arc<dyn ProductCatalog>,
    orders: Arc<dyn OrderStore>,
    max_line_quantity: u32,
    store_timeout: Duration,
    metrics: StorefrontMetrics,
}

impl CheckoutEngine {
    pub fn new(stores: &Stores, max_line_quantity: u32, store_timeout: Duration, metrics: StorefrontMetrics) -> Self {
        Self {
            carts: stores.carts.clone(),
            products: stores.products.clone(),
            orders: stores.orders.clone(),
            max_line_quantity,
            store_timeout,
            metrics,
        }
    }

    pub async fn checkout(
        &self,
        principal: &Principal,
        slot: CartSlot,
        idempotency_key: Option<&str>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let result = self.place_order(principal, slot, idempotency_key).await;
        match &result {
            Ok(receipt) => {
                self.metrics.checkout("created");
                info!(
                    user_id = %principal.id,
                    slot = %slot,
                    order_id = %receipt.order_id,
                    purchase_id = %receipt.purchase_id,
                    "order created"
                );
            }
            Err(err) => {
                self.metrics.checkout(err.outcome());
                info!(user_id = %principal.id, slot = %slot, outcome = err.outcome(), "checkout rejected");
            }
        }
        result
    }

    async fn place_order(
        &self,
        principal: &Principal,
        slot: CartSlot,
        idempotency_key: Option<&str>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let purchase_id = purchase_id_for(principal.id, idempotency_key);
        if idempotency_key.is_some() {
            let existing = with_timeout(
                self.store_timeout,
                "orders.find_by_purchase_id",
                self.orders.find_by_purchase_id(&purchase_id),
            )
            .await?;
            if existing.is_some() {
                return Err(CheckoutError::DuplicatePurchase { purchase_id });
            }
        }

        if !principal.profile.is_complete_for_checkout() {
            return Err(CheckoutError::IncompleteProfile);
        }

        let cart = with_timeout(self.store_timeout, "carts.get", self.carts.get(principal.id, slot))
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(CheckoutError::EmptyCart)?;

        let mut lines = Vec::with_capacity(cart.items.len());
        for item in &cart.items {
            if item.quantity == 0 || item.quantity > self.max_line_quantity {
                return Err(CheckoutError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            let product = with_timeout(
                self.store_timeout,
                "products.find_by_id",
                self.products.find_by_id(item.product_id),
            )
            .await?
            .ok_or(CheckoutError::ProductUnavailable {
                product_id: item.product_id,
            })?;
            lines.push(OrderLine {
                product_id: product.id,
                product_name: product.name,
                quantity: item.quantity,
                price_at_purchase: product.price,
            });
        }
        let total_price = sum_lines(lines.iter().map(|line| (line.price_at_purchase, line.quantity)))
            .map_err(|_| CheckoutError::TotalOverflow)?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            purchase_id: purchase_id.clone(),
            owner_id: principal.id,
            source_cart: CartClaim {
                owner_id: principal.id,
                slot,
                version: cart.version,
            },
            lines,
            total_price,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            buyer: BuyerSnapshot::from(&principal.profile),
            created_at: now,
            updated_at: now,
        };

        let claim = order.source_cart;
        let order = match with_timeout(self.store_timeout, "orders.create", self.orders.create(order)).await {
            Ok(order) => order,
            Err(StoreError::Conflict(constraint)) => {
                info!(user_id = %principal.id, constraint, "duplicate checkout suppressed");
                let purchase_id = match constraint {
                    "source_cart" => self.claimed_by(&claim).await.unwrap_or(purchase_id),
                    _ => purchase_id,
                };
                return Err(CheckoutError::DuplicatePurchase { purchase_id });
            }
            Err(source) => {
                return Err(CheckoutError::Persistence {
                    retryable: !source.is_timeout(),
                    source,
                })
            }
        };

        let cleared = with_timeout(
            self.store_timeout,
            "carts.clear_if_version",
            self.carts.clear_if_version(principal.id, slot, cart.version),
        )
        .await;
        match cleared {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.cart_clear_inconsistency();
                warn!(
                    user_id = %principal.id,
                    slot = %slot,
                    version = cart.version,
                    order_id = %order.id,
                    "cart changed during checkout; left for reconciliation"
                );
            }
            Err(err) => {
                self.metrics.cart_clear_inconsistency();
                warn!(
                    user_id = %principal.id,
                    slot = %slot,
                    order_id = %order.id,
                    error = %err,
                    "failed to clear cart after order was created"
                );
            }
        }

        Ok(CheckoutReceipt {
            purchase_id: order.purchase_id,
            order_id: order.id,
        })
    }

    /// Purchase id of the order that already consumed `claim`.
    async fn claimed_by(&self, claim: &CartClaim) -> Option<String> {
        let found = with_timeout(
            self.store_timeout,
            "orders.find_by_source_cart",
            self.orders.find_by_source_cart(claim),
        )
        .await;
        match found {
            Ok(order) => order.map(|order| order.purchase_id),
            Err(err) => {
                warn!(
                    owner_id = %claim.owner_id,
                    slot = %claim.slot,
                    error = %err,
                    "could not resolve the order holding this cart"
                );
                None
            }
        }
    }
}
