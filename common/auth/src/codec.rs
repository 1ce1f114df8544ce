use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::claims::{Claims, ClaimsRepr};
use crate::config::TokenConfig;
use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// A freshly signed access token plus its lifetime, as returned to clients.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

impl IssuedToken {
    pub fn expires_in(&self) -> i64 {
        (self.claims.expires_at - self.claims.issued_at).num_seconds()
    }
}

/// Signs and verifies HS256 identity tokens with the process-wide secret.
///
/// Verification is a pure function of `(token, now, secret)`: the library's
/// clock-based expiry check is disabled and `exp` is compared against the
/// caller-supplied instant, so a token is valid up to and including `exp`.
#[derive(Clone)]
pub struct TokenCodec {
    config: TokenConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenCodec {
    pub fn new(config: TokenConfig) -> Self {
        let encoding = EncodingKey::from_secret(config.secret());
        let decoding = DecodingKey::from_secret(config.secret());
        Self {
            config,
            encoding,
            decoding,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn issue(&self, subject: Uuid, role: Role) -> AuthResult<IssuedToken> {
        self.issue_at(subject, role, self.config.ttl, Utc::now())
    }

    pub fn issue_with_ttl(&self, subject: Uuid, role: Role, ttl: Duration) -> AuthResult<IssuedToken> {
        self.issue_at(subject, role, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: Uuid,
        role: Role,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AuthResult<IssuedToken> {
        if ttl <= Duration::zero() {
            return Err(AuthError::Signing("ttl must be positive".into()));
        }
        // Whole seconds only; the wire format has no sub-second precision.
        let issued_at = Utc
            .timestamp_opt(now.timestamp(), 0)
            .single()
            .ok_or_else(|| AuthError::Signing("issue time out of range".into()))?;
        let claims = Claims {
            subject,
            role,
            issued_at,
            expires_at: issued_at + ttl,
            issuer: self.config.issuer.clone(),
        };
        let repr = ClaimsRepr::from(&claims);
        let token = encode(&Header::new(Algorithm::HS256), &repr, &self.encoding)
            .map_err(|err| AuthError::Signing(err.to_string()))?;
        Ok(IssuedToken { token, claims })
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        self.verify_at(token, Utc::now())
    }

    /// Rejections are `Malformed`, `BadSignature` or `Expired`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        check_structure(token)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.set_issuer(&[self.config.issuer.clone()]);

        let token_data = decode::<Value>(token, &self.decoding, &validation)?;
        let claims = Claims::try_from(token_data.claims).map_err(|err| match err {
            AuthError::InvalidClaim(name, value) => AuthError::Malformed(format!("claim {name}={value}")),
            other => other,
        })?;

        if now.timestamp() > claims.expires_at.timestamp() {
            return Err(AuthError::Expired {
                expired_at: claims.expires_at,
            });
        }
        debug!(subject = %claims.subject, "verified token");
        Ok(claims)
    }
}

/// Three non-empty base64url segments; anything else never reaches signature checks.
fn check_structure(token: &str) -> AuthResult<()> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::Malformed(format!("expected 3 segments, found {}", segments.len())));
    }
    let valid = segments.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    });
    if !valid {
        return Err(AuthError::Malformed("token segments must be base64url".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    const SECRET: &str = "test-secret-with-at-least-32-bytes!!";

    fn codec() -> TokenCodec {
        TokenCodec::new(TokenConfig::new(SECRET, "test-issuer").expect("config"))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn flip(c: char) -> char {
        if c == 'A' { 'B' } else { 'A' }
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let codec = codec();
        let subject = Uuid::new_v4();
        let issued = codec
            .issue_at(subject, Role::Admin, Duration::seconds(600), t0())
            .expect("issue");
        let claims = codec.verify_at(&issued.token, t0()).expect("verify");
        assert_eq!(claims.subject, subject);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.issued_at, t0());
        assert_eq!(claims.expires_at, t0() + Duration::seconds(600));
        assert_eq!(claims.issuer, "test-issuer");
        assert_eq!(issued.expires_in(), 600);
    }

    #[test]
    fn token_valid_until_exactly_ttl_then_expired() {
        let codec = codec();
        let ttl = Duration::seconds(3600);
        let issued = codec.issue_at(Uuid::new_v4(), Role::User, ttl, t0()).unwrap();

        assert!(codec.verify_at(&issued.token, t0() + ttl - Duration::seconds(1)).is_ok());
        assert!(codec.verify_at(&issued.token, t0() + ttl).is_ok());
        let err = codec
            .verify_at(&issued.token, t0() + ttl + Duration::seconds(1))
            .expect_err("expired");
        assert!(matches!(err, AuthError::Expired { .. }));
    }

    #[test]
    fn verification_is_deterministic() {
        let codec = codec();
        let issued = codec.issue_at(Uuid::new_v4(), Role::User, Duration::seconds(60), t0()).unwrap();
        let a = codec.verify_at(&issued.token, t0()).unwrap();
        let b = codec.verify_at(&issued.token, t0()).unwrap();
        assert_eq!(a.subject, b.subject);
        assert_eq!(a.expires_at, b.expires_at);
    }

    #[test]
    fn any_flipped_payload_or_signature_char_is_bad_signature() {
        let codec = codec();
        let issued = codec.issue_at(Uuid::new_v4(), Role::User, Duration::seconds(60), t0()).unwrap();
        let token = issued.token;
        let header_len = token.find('.').unwrap() + 1;

        for (idx, ch) in token.char_indices().skip(header_len) {
            if ch == '.' {
                continue;
            }
            let mut tampered = token.clone();
            tampered.replace_range(idx..idx + 1, &flip(ch).to_string());
            let err = codec
                .verify_at(&tampered, t0())
                .expect_err("tampered token must not verify");
            assert!(
                matches!(err, AuthError::BadSignature),
                "index {idx}: expected BadSignature, got {err:?}"
            );
        }
    }

    #[test]
    fn token_signed_with_other_secret_is_bad_signature() {
        let other = TokenCodec::new(TokenConfig::new("another-secret-entirely-0123456789", "test-issuer").unwrap());
        let issued = other.issue_at(Uuid::new_v4(), Role::User, Duration::seconds(60), t0()).unwrap();
        let err = codec().verify_at(&issued.token, t0()).expect_err("foreign token");
        assert!(matches!(err, AuthError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        for token in ["", "abc", "a.b", "a.b.c.d", "a..c", "a.b.c!", "not a token"] {
            let err = codec.verify_at(token, t0()).expect_err("garbage");
            assert!(matches!(err, AuthError::Malformed(_)), "{token:?} gave {err:?}");
        }
    }

    #[test]
    fn unsigned_alg_none_header_is_rejected() {
        let codec = codec();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            format!(
                r#"{{"sub":"{}","role":"owner","iat":{},"exp":{},"iss":"test-issuer"}}"#,
                Uuid::new_v4(),
                t0().timestamp(),
                t0().timestamp() + 60
            )
            .as_bytes(),
        );
        let token = format!("{header}.{payload}.AAAA");
        let err = codec.verify_at(&token, t0()).expect_err("alg none");
        assert!(!matches!(err, AuthError::Expired { .. }));
        assert!(err.is_token_rejection());
    }

    #[test]
    fn wrong_issuer_is_malformed() {
        let other = TokenCodec::new(TokenConfig::new(SECRET, "someone-else").unwrap());
        let issued = other.issue_at(Uuid::new_v4(), Role::User, Duration::seconds(60), t0()).unwrap();
        let err = codec().verify_at(&issued.token, t0()).expect_err("issuer mismatch");
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[test]
    fn non_positive_ttl_cannot_be_issued() {
        let err = codec()
            .issue_at(Uuid::new_v4(), Role::User, Duration::zero(), t0())
            .expect_err("zero ttl");
        assert!(matches!(err, AuthError::Signing(_)));
    }
}
