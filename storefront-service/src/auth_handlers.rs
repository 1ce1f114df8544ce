use axum::extract::State;
use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use common_http_errors::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::AppState;
use crate::extract::ApiJson;
use crate::models::{
    set_password, verify_password, verify_unknown_user, CredentialRecord, CredentialUpdate, PasswordError, Profile,
    PublicUser,
};
use crate::storage::StoreError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(flatten)]
    pub profile: Profile,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    pub user: PublicUser,
}

pub(crate) fn password_error(err: PasswordError) -> ApiError {
    match err {
        PasswordError::Empty => ApiError::bad_request("invalid_password", "Password must not be empty"),
        other @ PasswordError::Hash(_) => ApiError::internal(other),
    }
}

pub(crate) fn username_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict("username") => ApiError::conflict("username_taken", "That username is already taken"),
        other => ApiError::from(other),
    }
}

pub(crate) fn normalize_username(raw: &str) -> ApiResult<String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(ApiError::bad_request("invalid_username", "Username must not be empty"));
    }
    Ok(username.to_string())
}

fn invalid_credentials() -> ApiError {
    ApiError::unauthenticated("invalid_credentials", "Invalid username or password")
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<PublicUser>)> {
    let username = normalize_username(&payload.username)?;
    let record = set_password(CredentialRecord::new(username, payload.profile), &payload.password)
        .map_err(password_error)?;

    let record = state
        .timed("credentials.create", state.stores.credentials.create(record))
        .await
        .map_err(username_error)?;

    info!(user_id = %record.id, username = %record.username, "user registered");
    Ok((StatusCode::CREATED, Json(PublicUser::from(&record))))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<(HeaderMap, Json<LoginResponse>)> {
    let username = payload.username.trim();
    let record = state
        .timed("credentials.find_by_username", state.stores.credentials.find_by_username(username))
        .await?;

    let Some(record) = record else {
        verify_unknown_user(&payload.password);
        state.metrics.login_attempt("unknown_user");
        warn!(username, "login for unknown user");
        return Err(invalid_credentials());
    };
    if !verify_password(&record, &payload.password) {
        state.metrics.login_attempt("bad_password");
        warn!(user_id = %record.id, "login with wrong password");
        return Err(invalid_credentials());
    }

    let issued = state
        .token_codec
        .issue(record.id, record.role)
        .map_err(ApiError::from)?;

    let update = CredentialUpdate {
        last_login_at: Some(Utc::now()),
        ..CredentialUpdate::default()
    };
    let record = state
        .timed("credentials.update", state.stores.credentials.update(record.id, update))
        .await?
        .ok_or_else(invalid_credentials)?;

    let mut headers = HeaderMap::new();
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.token_codec.config().cookie_name,
        issued.token,
        issued.expires_in()
    );
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.insert(SET_COOKIE, value);
        }
        Err(err) => warn!(error = %err, "session cookie not set"),
    }

    state.metrics.login_attempt("success");
    info!(user_id = %record.id, role = %record.role, "user logged in");
    Ok((
        headers,
        Json(LoginResponse {
            expires_in: issued.expires_in(),
            expires_at: issued.claims.expires_at,
            token: issued.token,
            token_type: "Bearer",
            user: PublicUser::from(&record),
        }),
    ))
}
