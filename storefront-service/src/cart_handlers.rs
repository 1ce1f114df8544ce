use axum::extract::State;
use axum::Json;
use common_auth::{authorize, SHOPPER_ROLES};
use common_http_errors::{ApiError, ApiResult};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::app::AppState;
use crate::extract::{ApiJson, ApiPath};
use crate::gate::Principal;
use crate::models::{Cart, CartSlot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    #[serde(alias = "product_id")]
    pub product_id: Uuid,
    /// Signed delta; a line that drops to zero or below is removed.
    pub quantity: i64,
}

pub(crate) fn parse_slot(raw: &str) -> ApiResult<CartSlot> {
    raw.parse::<CartSlot>()
        .map_err(|_| ApiError::bad_request("invalid_slot", "cart slot must be 1 or 2"))
}

pub async fn get_cart(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(slot): ApiPath<String>,
) -> ApiResult<Json<Cart>> {
    authorize(SHOPPER_ROLES, &principal)?;
    let slot = parse_slot(&slot)?;
    let cart = state
        .timed("carts.get", state.stores.carts.get(principal.id, slot))
        .await?
        .unwrap_or_else(|| Cart::empty(principal.id, slot));
    Ok(Json(cart))
}

pub async fn add_cart_item(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(slot): ApiPath<String>,
    ApiJson(payload): ApiJson<CartItemRequest>,
) -> ApiResult<Json<Cart>> {
    authorize(SHOPPER_ROLES, &principal)?;
    let slot = parse_slot(&slot)?;

    if payload.quantity > 0 {
        let product = state
            .timed("products.find_by_id", state.stores.products.find_by_id(payload.product_id))
            .await?;
        if product.is_none() {
            return Err(ApiError::not_found("product_not_found"));
        }
    }

    let cart = state
        .timed(
            "carts.upsert_item",
            state.stores.carts.upsert_item(
                principal.id,
                slot,
                payload.product_id,
                payload.quantity,
                state.config.max_line_quantity,
            ),
        )
        .await?;

    debug!(
        user_id = %principal.id,
        slot = %slot,
        product_id = %payload.product_id,
        delta = payload.quantity,
        version = cart.version,
        "cart updated"
    );
    Ok(Json(cart))
}
