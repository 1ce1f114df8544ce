pub mod app;
pub mod auth_handlers;
pub mod cart_handlers;
pub mod checkout;
pub mod config;
pub mod extract;
pub mod gate;
pub mod metrics;
pub mod models;
pub mod order_handlers;
pub mod product_handlers;
pub mod profile_handlers;
pub mod storage;

pub use app::{build_router, build_stores, build_token_codec_from_env, seed_demo_catalog, AppState};
pub use checkout::{CheckoutEngine, CheckoutError, CheckoutReceipt};
pub use config::{load_service_config, ServiceConfig};
pub use gate::Principal;
