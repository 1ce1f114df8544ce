use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use common_auth::{authorize, Role, ALL_ROLES, ELEVATED_ROLES, OWNER_ONLY};
use common_http_errors::{ApiError, ApiResult};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth_handlers::{normalize_username, password_error, username_error};
use crate::extract::{ApiJson, ApiPath};
use crate::gate::Principal;
use crate::models::{hash_password, CredentialUpdate, ProfilePatch, PublicUser};

/// Fields a user may change on their own account. Role is not one of them.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileUpdateRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub phone1: Option<String>,
    pub phone2: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub password: String,
}

fn user_not_found() -> ApiError {
    ApiError::not_found("user_not_found")
}

pub async fn get_profile(State(state): State<AppState>, principal: Principal) -> ApiResult<Json<PublicUser>> {
    authorize(ALL_ROLES, &principal)?;
    let record = state
        .timed("credentials.find_by_id", state.stores.credentials.find_by_id(principal.id))
        .await?
        .ok_or_else(user_not_found)?;
    Ok(Json(PublicUser::from(&record)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(payload): ApiJson<ProfileUpdateRequest>,
) -> ApiResult<Json<PublicUser>> {
    authorize(ALL_ROLES, &principal)?;

    let trimmed = |value: Option<String>| value.map(|v| v.trim().to_string());
    let profile = ProfilePatch {
        first_name: trimmed(payload.first_name),
        last_name: trimmed(payload.last_name),
        address: trimmed(payload.address),
        phone1: trimmed(payload.phone1),
        phone2: trimmed(payload.phone2),
        email: trimmed(payload.email),
    };

    let username = payload.username.as_deref().map(normalize_username).transpose()?;
    let password_hash = payload
        .password
        .as_deref()
        .map(hash_password)
        .transpose()
        .map_err(password_error)?;
    let changed_password = password_hash.is_some();

    let update = CredentialUpdate {
        username,
        password_hash,
        profile,
        ..CredentialUpdate::default()
    };
    let record = state
        .timed("credentials.update", state.stores.credentials.update(principal.id, update))
        .await
        .map_err(username_error)?
        .ok_or_else(user_not_found)?;

    info!(user_id = %record.id, changed_password, "profile updated");
    Ok(Json(PublicUser::from(&record)))
}

pub async fn delete_profile(State(state): State<AppState>, principal: Principal) -> ApiResult<StatusCode> {
    authorize(ALL_ROLES, &principal)?;
    let removed = state
        .timed("credentials.delete", state.stores.credentials.delete(principal.id))
        .await?;
    if !removed {
        return Err(user_not_found());
    }
    info!(user_id = %principal.id, "account deleted by its owner");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_role(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<RoleRequest>,
) -> ApiResult<Json<PublicUser>> {
    authorize(OWNER_ONLY, &principal)?;
    let role = payload
        .role
        .parse::<Role>()
        .map_err(|_| ApiError::bad_request("invalid_role", "Role must be one of user, admin, owner"))?;

    let update = CredentialUpdate {
        role: Some(role),
        ..CredentialUpdate::default()
    };
    let record = state
        .timed("credentials.update", state.stores.credentials.update(user_id, update))
        .await?
        .ok_or_else(user_not_found)?;

    info!(actor = %principal.id, user_id = %record.id, role = %record.role, "role changed");
    Ok(Json(PublicUser::from(&record)))
}

pub async fn reset_password(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<PasswordResetRequest>,
) -> ApiResult<StatusCode> {
    authorize(ELEVATED_ROLES, &principal)?;

    let target = state
        .timed("credentials.find_by_id", state.stores.credentials.find_by_id(user_id))
        .await?
        .ok_or_else(user_not_found)?;
    if target.role == Role::Owner && principal.role != Role::Owner {
        return Err(ApiError::forbidden("Only an owner can reset an owner's password"));
    }

    let update = CredentialUpdate {
        password_hash: Some(hash_password(&payload.password).map_err(password_error)?),
        ..CredentialUpdate::default()
    };
    state
        .timed("credentials.update", state.stores.credentials.update(user_id, update))
        .await?
        .ok_or_else(user_not_found)?;

    info!(actor = %principal.id, user_id = %user_id, "password reset");
    Ok(StatusCode::NO_CONTENT)
}
