pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod roles;

pub use claims::Claims;
pub use codec::{IssuedToken, TokenCodec};
pub use config::TokenConfig;
pub use error::{AuthError, AuthResult};
pub use extractors::{extract_token, AuthContext, TokenSource};
pub use guards::{authorize, RoleBearer};
pub use roles::{Role, ALL_ROLES, ELEVATED_ROLES, OWNER_ONLY, SHOPPER_ROLES};
