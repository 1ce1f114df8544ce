use std::env;
use std::fmt;

use chrono::Duration;

use crate::error::{AuthError, AuthResult};

pub const DEFAULT_ALT_TOKEN_HEADER: &str = "X-Access-Token";
pub const DEFAULT_TOKEN_COOKIE: &str = "access_token";

/// Process-wide token configuration. Built once at startup and shared
/// read-only; the signing secret never changes while the process runs.
#[derive(Clone)]
pub struct TokenConfig {
    secret: Vec<u8>,
    /// Expected issuer claim (iss).
    pub issuer: String,
    /// Lifetime applied by `TokenCodec::issue`.
    pub ttl: Duration,
    /// Header consulted after `Authorization: Bearer`.
    pub alt_header: String,
    /// Cookie consulted last.
    pub cookie_name: String,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("alt_header", &self.alt_header)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

impl TokenConfig {
    /// Construct config with a one day token lifetime.
    pub fn new(secret: impl Into<Vec<u8>>, issuer: impl Into<String>) -> AuthResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::Config("signing secret must not be empty".into()));
        }
        Ok(Self {
            secret,
            issuer: issuer.into(),
            ttl: Duration::days(1),
            alt_header: DEFAULT_ALT_TOKEN_HEADER.to_string(),
            cookie_name: DEFAULT_TOKEN_COOKIE.to_string(),
        })
    }

    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl = Duration::seconds(seconds);
        self
    }

    pub fn with_alt_header(mut self, header: impl Into<String>) -> Self {
        self.alt_header = header.into();
        self
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Load from `JWT_SECRET` (required), `JWT_ISSUER`, `JWT_TTL_SECONDS`,
    /// `AUTH_ALT_TOKEN_HEADER` and `AUTH_TOKEN_COOKIE`.
    pub fn from_env() -> AuthResult<Self> {
        let secret = env::var("JWT_SECRET")
            .map_err(|_| AuthError::Config("JWT_SECRET must be set".into()))?;
        if secret.len() < 32 {
            tracing::warn!(len = secret.len(), "JWT_SECRET is shorter than 32 bytes");
        }
        let issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "storefront".to_string());
        let mut config = TokenConfig::new(secret.into_bytes(), issuer)?;

        if let Ok(value) = env::var("JWT_TTL_SECONDS") {
            let ttl = value
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|ttl| *ttl > 0)
                .ok_or_else(|| AuthError::Config(format!("invalid JWT_TTL_SECONDS '{value}'")))?;
            config = config.with_ttl_seconds(ttl);
        }
        if let Ok(header) = env::var("AUTH_ALT_TOKEN_HEADER") {
            if !header.trim().is_empty() {
                config = config.with_alt_header(header.trim());
            }
        }
        if let Ok(cookie) = env::var("AUTH_TOKEN_COOKIE") {
            if !cookie.trim().is_empty() {
                config = config.with_cookie_name(cookie.trim());
            }
        }
        Ok(config)
    }
}
