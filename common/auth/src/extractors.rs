use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap, HeaderValue};
use headers::{Cookie, HeaderMapExt};

use crate::claims::Claims;
use crate::codec::TokenCodec;
use crate::config::TokenConfig;
use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// Where the presented token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Bearer,
    AltHeader,
    Cookie,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Bearer => "bearer",
            TokenSource::AltHeader => "header",
            TokenSource::Cookie => "cookie",
        }
    }
}

/// Verified claims for the current request. This proves the token is
/// authentic and unexpired; it says nothing about whether the subject
/// still exists.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
    pub source: TokenSource,
}

impl AuthContext {
    pub fn role(&self) -> Role {
        self.claims.role
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<TokenCodec>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let codec = Arc::<TokenCodec>::from_ref(state);
        let (token, source) = extract_token(&parts.headers, codec.config())?;
        let claims = codec.verify(&token)?;
        Ok(Self {
            claims,
            token,
            source,
        })
    }
}

/// Locate the token: `Authorization: Bearer`, then the alternate header,
/// then the cookie. An `Authorization` header with another scheme is
/// skipped so a later source can still supply the token.
pub fn extract_token(headers: &HeaderMap, config: &TokenConfig) -> AuthResult<(String, TokenSource)> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        if let Some(token) = parse_bearer(value)? {
            return Ok((token, TokenSource::Bearer));
        }
    }

    if let Some(value) = headers.get(config.alt_header.as_str()) {
        let token = value
            .to_str()
            .map_err(|_| AuthError::InvalidAuthorization)?
            .trim();
        if token.is_empty() {
            return Err(AuthError::InvalidAuthorization);
        }
        return Ok((token.to_owned(), TokenSource::AltHeader));
    }

    if let Some(cookie) = headers.typed_get::<Cookie>() {
        if let Some(token) = cookie.get(config.cookie_name.as_str()) {
            let token = token.trim();
            if !token.is_empty() {
                return Ok((token.to_owned(), TokenSource::Cookie));
            }
        }
    }

    Err(AuthError::MissingToken)
}

/// `Ok(None)` when the header carries a different scheme.
fn parse_bearer(value: &HeaderValue) -> AuthResult<Option<String>> {
    let raw = value
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorization)?
        .trim();

    let (scheme, rest) = raw.split_once(' ').unwrap_or((raw, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }

    let token = rest.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidAuthorization);
    }

    Ok(Some(token.to_owned()))
}
