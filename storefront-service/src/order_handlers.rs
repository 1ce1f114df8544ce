use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use common_auth::{authorize, ALL_ROLES, ELEVATED_ROLES, SHOPPER_ROLES};
use common_http_errors::{ApiError, ApiResult};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::cart_handlers::parse_slot;
use crate::checkout::CheckoutReceipt;
use crate::extract::{ApiJson, ApiPath};
use crate::gate::Principal;
use crate::models::{Order, OrderStatus, PaymentStatus, TransitionError};
use crate::storage::StoreError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

fn order_not_found() -> ApiError {
    ApiError::not_found("order_not_found")
}

fn transition_error(err: TransitionError) -> ApiError {
    match err {
        TransitionError::UnknownStatus(value) => {
            ApiError::bad_request("invalid_status", format!("unknown order status '{value}'"))
        }
        TransitionError::UnknownPaymentStatus(value) => {
            ApiError::bad_request("invalid_payment_status", format!("unknown payment status '{value}'"))
        }
        err @ TransitionError::Invalid { .. } => ApiError::conflict("invalid_transition", err.to_string()),
    }
}

pub(crate) fn idempotency_key(headers: &HeaderMap) -> ApiResult<Option<String>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map(str::trim)
        .map_err(|_| ApiError::bad_request("invalid_idempotency_key", "Idempotency-Key must be visible ASCII"))?;
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::bad_request(
            "invalid_idempotency_key",
            "Idempotency-Key must be between 1 and 255 characters",
        ));
    }
    Ok(Some(key.to_string()))
}

pub async fn checkout(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(slot): ApiPath<String>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<CheckoutReceipt>)> {
    authorize(SHOPPER_ROLES, &principal)?;
    let slot = parse_slot(&slot)?;
    let key = idempotency_key(&headers)?;

    let receipt = state.checkout.checkout(&principal, slot, key.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn list_orders(State(state): State<AppState>, principal: Principal) -> ApiResult<Json<Vec<Order>>> {
    authorize(ELEVATED_ROLES, &principal)?;
    let orders = state.timed("orders.list_all", state.stores.orders.list_all()).await?;
    Ok(Json(orders))
}

pub async fn list_my_orders(State(state): State<AppState>, principal: Principal) -> ApiResult<Json<Vec<Order>>> {
    authorize(ALL_ROLES, &principal)?;
    let orders = state
        .timed("orders.find_by_owner", state.stores.orders.find_by_owner(principal.id))
        .await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(order_id): ApiPath<Uuid>,
) -> ApiResult<Json<Order>> {
    authorize(ALL_ROLES, &principal)?;
    let order = state
        .timed("orders.find_by_id", state.stores.orders.find_by_id(order_id))
        .await?
        .ok_or_else(order_not_found)?;
    if !principal.is_elevated() && !order.is_owned_by(principal.id) {
        info!(user_id = %principal.id, order_id = %order_id, "order read denied");
        return Err(ApiError::forbidden("You do not have access to this order"));
    }
    Ok(Json(order))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(order_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<StatusRequest>,
) -> ApiResult<Json<Order>> {
    authorize(ELEVATED_ROLES, &principal)?;
    let next = payload.status.parse::<OrderStatus>().map_err(transition_error)?;

    let current = state
        .timed("orders.find_by_id", state.stores.orders.find_by_id(order_id))
        .await?
        .ok_or_else(order_not_found)?;
    let next = current.status.transition_to(next).map_err(transition_error)?;

    let updated = state
        .timed(
            "orders.update_status",
            state.stores.orders.update_status(order_id, current.status, next),
        )
        .await
        .map_err(|err| match err {
            StoreError::Stale => {
                ApiError::conflict("invalid_transition", "order status changed concurrently; reload and retry")
            }
            other => ApiError::from(other),
        })?
        .ok_or_else(order_not_found)?;

    info!(
        actor = %principal.id,
        order_id = %order_id,
        from = %current.status,
        to = %updated.status,
        "order status changed"
    );
    Ok(Json(updated))
}

pub async fn update_payment_status(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(order_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<StatusRequest>,
) -> ApiResult<Json<Order>> {
    authorize(ELEVATED_ROLES, &principal)?;
    let status = payload.status.parse::<PaymentStatus>().map_err(transition_error)?;

    let updated = state
        .timed(
            "orders.update_payment_status",
            state.stores.orders.update_payment_status(order_id, status),
        )
        .await?
        .ok_or_else(order_not_found)?;

    info!(actor = %principal.id, order_id = %order_id, payment_status = %status, "payment status changed");
    Ok(Json(updated))
}

pub async fn delete_order(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(order_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    authorize(ELEVATED_ROLES, &principal)?;
    let removed = state
        .timed("orders.delete", state.stores.orders.delete(order_id))
        .await?;
    if !removed {
        return Err(order_not_found());
    }
    info!(actor = %principal.id, order_id = %order_id, "order deleted");
    Ok(StatusCode::NO_CONTENT)
}
