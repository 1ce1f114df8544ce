pub mod cart;
pub mod credentials;
pub mod order;
pub mod product;

pub use cart::{Cart, CartError, CartItem, CartSlot, DEFAULT_MAX_LINE_QUANTITY};
pub use credentials::{
    hash_password, set_password, verify_password, verify_unknown_user, CredentialRecord, CredentialUpdate,
    PasswordError, Profile, ProfilePatch, PublicUser,
};
pub use order::{BuyerSnapshot, CartClaim, Order, OrderLine, OrderStatus, PaymentStatus, TransitionError};
pub use product::Product;
