use std::fmt;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use common_auth::Role;
use once_cell::sync::Lazy;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Contact and delivery details attached to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub phone1: String,
    pub phone2: String,
    pub email: String,
}

impl Profile {
    /// Checkout needs somewhere to ship and someone to call.
    pub fn is_complete_for_checkout(&self) -> bool {
        !self.address.trim().is_empty() && !self.phone1.trim().is_empty()
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// Per-field profile change. Fields left as `None` keep whatever the store
/// holds when the patch is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub phone1: Option<String>,
    pub phone2: Option<String>,
    pub email: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.address.is_none()
            && self.phone1.is_none()
            && self.phone2.is_none()
            && self.email.is_none()
    }

    pub fn apply(self, profile: &mut Profile) {
        let fields = [
            (self.first_name, &mut profile.first_name),
            (self.last_name, &mut profile.last_name),
            (self.address, &mut profile.address),
            (self.phone1, &mut profile.phone1),
            (self.phone2, &mut profile.phone2),
            (self.email, &mut profile.email),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("created_at", &self.created_at)
            .field("last_login_at", &self.last_login_at)
            .finish_non_exhaustive()
    }
}

impl CredentialRecord {
    /// A fresh `user` account. The caller must still run [`set_password`].
    pub fn new(username: impl Into<String>, profile: Profile) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            password_hash: String::new(),
            role: Role::User,
            profile,
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// The only serialized form of an account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    #[serde(flatten)]
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&CredentialRecord> for PublicUser {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            id: record.id,
            username: record.username.clone(),
            role: record.role,
            profile: record.profile.clone(),
            created_at: record.created_at,
            last_login_at: record.last_login_at,
        }
    }
}

/// Partial update applied by the credential store. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub profile: ProfilePatch,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl CredentialUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password_hash.is_none()
            && self.role.is_none()
            && self.profile.is_empty()
            && self.last_login_at.is_none()
    }

    pub fn apply_to(self, record: &mut CredentialRecord) {
        if let Some(username) = self.username {
            record.username = username;
        }
        if let Some(hash) = self.password_hash {
            record.password_hash = hash;
        }
        if let Some(role) = self.role {
            record.role = role;
        }
        self.profile.apply(&mut record.profile);
        if let Some(at) = self.last_login_at {
            record.last_login_at = Some(at);
        }
    }
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password must not be empty")]
    Empty,
    #[error("failed to hash password: {0}")]
    Hash(String),
}

pub fn hash_password(plaintext: &str) -> Result<String, PasswordError> {
    if plaintext.trim().is_empty() {
        return Err(PasswordError::Empty);
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| PasswordError::Hash(err.to_string()))
}

/// Returns the record with a freshly salted hash of `plaintext`.
pub fn set_password(mut record: CredentialRecord, plaintext: &str) -> Result<CredentialRecord, PasswordError> {
    record.password_hash = hash_password(plaintext)?;
    Ok(record)
}

pub fn verify_password(record: &CredentialRecord, plaintext: &str) -> bool {
    verify_hash(&record.password_hash, plaintext)
}

fn verify_hash(hash: &str, plaintext: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

static UNKNOWN_USER_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("unknown-user-placeholder").ok());

/// Spends the same argon2 work as a real check so unknown usernames cannot be
/// told apart by response time. Always false.
pub fn verify_unknown_user(plaintext: &str) -> bool {
    if let Some(hash) = UNKNOWN_USER_HASH.as_deref() {
        verify_hash(hash, plaintext);
    }
    false
}
