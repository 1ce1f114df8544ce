use uuid::Uuid;

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};
use crate::extractors::AuthContext;
use crate::roles::Role;

/// Anything that carries an authenticated subject and its current role.
pub trait RoleBearer {
    fn subject_id(&self) -> Uuid;
    fn role(&self) -> Role;
}

impl RoleBearer for Claims {
    fn subject_id(&self) -> Uuid {
        self.subject
    }

    fn role(&self) -> Role {
        self.role
    }
}

impl RoleBearer for AuthContext {
    fn subject_id(&self) -> Uuid {
        self.claims.subject
    }

    fn role(&self) -> Role {
        self.claims.role
    }
}

/// Allow when the principal's role is in `required`. An empty set allows
/// any authenticated principal.
pub fn authorize<P: RoleBearer + ?Sized>(required: &[Role], principal: &P) -> AuthResult<()> {
    if required.is_empty() || required.contains(&principal.role()) {
        return Ok(());
    }

    tracing::debug!(
        subject = %principal.subject_id(),
        role = %principal.role(),
        "role check failed"
    );
    Err(AuthError::Forbidden {
        required: required.iter().map(Role::as_str).collect(),
    })
}
