use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use common_http_errors::ApiError;
use jsonwebtoken::errors::ErrorKind;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no authentication token supplied")]
    MissingToken,
    #[error("authorization header malformed")]
    InvalidAuthorization,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("token subject no longer exists")]
    UnknownSubject,
    #[error("insufficient role")]
    Forbidden { required: Vec<&'static str> },
    #[error("auth configuration error: {0}")]
    Config(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl AuthError {
    /// True for the rejections that mean "this token cannot identify anyone".
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::Malformed(_) | AuthError::BadSignature | AuthError::Expired { .. } | AuthError::InvalidClaim(_, _)
        )
    }

    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing",
            AuthError::InvalidAuthorization => "bad_header",
            AuthError::Malformed(_) | AuthError::InvalidClaim(_, _) => "malformed",
            AuthError::BadSignature => "bad_signature",
            AuthError::Expired { .. } => "expired",
            AuthError::UnknownSubject => "unknown_subject",
            AuthError::Forbidden { .. } => "forbidden",
            AuthError::Config(_) | AuthError::Signing(_) => "internal",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        match value.kind() {
            ErrorKind::InvalidSignature => Self::BadSignature,
            _ => Self::Malformed(value.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::MissingToken => ApiError::unauthenticated("missing_token", "Authentication token missing"),
            AuthError::InvalidAuthorization => {
                ApiError::unauthenticated("invalid_authorization", "Authorization header malformed")
            }
            AuthError::Malformed(_) | AuthError::BadSignature | AuthError::InvalidClaim(_, _) => {
                ApiError::unauthenticated("invalid_token", "Authentication token is invalid")
            }
            AuthError::Expired { .. } => {
                ApiError::unauthenticated("token_expired", "Authentication token has expired; please sign in again")
            }
            AuthError::UnknownSubject => {
                ApiError::unauthenticated("unknown_subject", "Account for this token no longer exists")
            }
            AuthError::Forbidden { required } => ApiError::ForbiddenMissingRole { required },
            other @ (AuthError::Config(_) | AuthError::Signing(_)) => ApiError::internal(other),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
