use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::{header::RETRY_AFTER, StatusCode, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub const ERROR_CODE_HEADER: &str = "X-Error-Code";

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub missing_role: Option<String>,
}

/// Client-facing error taxonomy. Every variant maps to one status class and a
/// stable machine-readable code; internal causes are never part of the body.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated { code: &'static str, message: String },
    ForbiddenMissingRole { required: Vec<&'static str> },
    Forbidden { message: String },
    BadRequest { code: &'static str, message: Option<String> },
    NotFound { code: &'static str },
    Conflict { code: &'static str, message: String },
    /// Store unavailable or timed out. `retryable` is false when a write may
    /// already have been applied.
    Persistence { retryable: bool },
    Internal,
}

impl ApiError {
    pub fn unauthenticated(code: &'static str, message: impl Into<String>) -> Self { Self::Unauthenticated { code, message: message.into() } }
    pub fn forbidden(message: impl Into<String>) -> Self { Self::Forbidden { message: message.into() } }
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self { Self::BadRequest { code, message: Some(message.into()) } }
    pub fn not_found(code: &'static str) -> Self { Self::NotFound { code } }
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self { Self::Conflict { code, message: message.into() } }

    /// Logs the underlying cause server-side and returns the opaque variant.
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        tracing::error!(error = %e, "internal error");
        Self::Internal
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            ApiError::ForbiddenMissingRole { .. } | ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Persistence { retryable: true } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Persistence { retryable: false } | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated { code, .. } => code,
            ApiError::ForbiddenMissingRole { .. } => "missing_role",
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::BadRequest { code, .. } => code,
            ApiError::NotFound { code } => code,
            ApiError::Conflict { code, .. } => code,
            ApiError::Persistence { .. } => "persistence_error",
            ApiError::Internal => "internal_error",
        }
    }
}

fn default_message(code: &str) -> String {
    match code {
        "persistence_error" => "The data store is temporarily unavailable. Please retry.".to_string(),
        "internal_error" => "An internal error occurred.".to_string(),
        other => other.replace('_', " "),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let retry_after = matches!(self, ApiError::Persistence { retryable: true });
        let body = match self {
            ApiError::ForbiddenMissingRole { required } => ErrorBody {
                code: code.into(),
                message: format!("Insufficient role. Required one of: {}", required.join(", ")),
                missing_role: Some(required.join(",")),
            },
            ApiError::Unauthenticated { message, .. }
            | ApiError::Forbidden { message }
            | ApiError::Conflict { message, .. } => ErrorBody { code: code.into(), message, missing_role: None },
            ApiError::BadRequest { message, .. } => ErrorBody {
                code: code.into(),
                message: message.unwrap_or_else(|| default_message(code)),
                missing_role: None,
            },
            ApiError::NotFound { .. } | ApiError::Persistence { .. } | ApiError::Internal => ErrorBody {
                code: code.into(),
                message: default_message(code),
                missing_role: None,
            },
        };
        let mut resp = (status, Json(body)).into_response();
        resp.headers_mut().insert(ERROR_CODE_HEADER, HeaderValue::from_static(code));
        if retry_after {
            resp.headers_mut().insert(RETRY_AFTER, HeaderValue::from_static("1"));
        }
        resp
    }
}

/// Malformed, mistyped or unknown body fields all surface as `invalid_body`.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("invalid_body", rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request("invalid_id", rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
