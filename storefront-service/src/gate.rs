use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common_auth::{AuthContext, AuthError, Role, RoleBearer};
use common_http_errors::ApiError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::models::{CredentialRecord, Profile};
use crate::storage::with_timeout;

/// The authenticated caller, resolved fresh for every request from a verified
/// token plus the current credential record. The role comes from the store,
/// so a demotion takes effect on the next request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub profile: Profile,
}

impl Principal {
    pub fn is_elevated(&self) -> bool {
        self.role.is_elevated()
    }
}

impl From<CredentialRecord> for Principal {
    fn from(record: CredentialRecord) -> Self {
        Self {
            id: record.id,
            username: record.username,
            role: record.role,
            profile: record.profile,
        }
    }
}

impl RoleBearer for Principal {
    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = match AuthContext::from_request_parts(parts, state).await {
            Ok(auth) => auth,
            Err(err) => return Err(reject(state, err)),
        };

        let subject = auth.claims.subject;
        let record = with_timeout(
            state.config.store_timeout,
            "credentials.find_by_id",
            state.stores.credentials.find_by_id(subject),
        )
        .await
        .map_err(|err| {
            warn!(user_id = %subject, error = %err, "credential lookup failed during authentication");
            ApiError::from(err)
        })?;

        match record {
            Some(record) => {
                debug!(user_id = %record.id, role = %record.role, source = auth.source.as_str(), "request authenticated");
                Ok(Principal::from(record))
            }
            None => Err(reject(state, AuthError::UnknownSubject)),
        }
    }
}

fn reject(state: &AppState, err: AuthError) -> ApiError {
    state.metrics.auth_rejected(err.reason());
    debug!(reason = err.reason(), error = %err, "authentication rejected");
    ApiError::from(err)
}
