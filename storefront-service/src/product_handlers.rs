use axum::extract::State;
use axum::Json;
use common_auth::{authorize, ALL_ROLES};
use common_http_errors::{ApiError, ApiResult};
use uuid::Uuid;

use crate::app::AppState;
use crate::extract::ApiPath;
use crate::gate::Principal;
use crate::models::Product;

pub async fn list_products(State(state): State<AppState>, principal: Principal) -> ApiResult<Json<Vec<Product>>> {
    authorize(ALL_ROLES, &principal)?;
    let products = state.timed("products.list", state.stores.products.list()).await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(product_id): ApiPath<Uuid>,
) -> ApiResult<Json<Product>> {
    authorize(ALL_ROLES, &principal)?;
    state
        .timed("products.find_by_id", state.stores.products.find_by_id(product_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("product_not_found"))
}
