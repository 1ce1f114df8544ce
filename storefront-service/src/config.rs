use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::models::DEFAULT_MAX_LINE_QUANTITY;

const DEFAULT_PORT: u16 = 8086;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Upper bound for a single cart line.
    pub max_line_quantity: u32,
    /// Applied to every store call.
    pub store_timeout: Duration,
    /// Selects the Postgres backend when present.
    pub database_url: Option<String>,
    pub seed_demo_catalog: bool,
    pub cors_allowed_origins: Vec<String>,
}

impl ServiceConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            max_line_quantity: DEFAULT_MAX_LINE_QUANTITY,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            database_url: None,
            seed_demo_catalog: false,
            cors_allowed_origins: default_origins(),
        }
    }
}

pub fn load_service_config() -> Result<ServiceConfig> {
    let defaults = ServiceConfig::default();

    let host = match env::var("HOST") {
        Ok(value) => value
            .trim()
            .parse::<IpAddr>()
            .with_context(|| format!("Failed to parse HOST '{value}'"))?,
        Err(_) => defaults.host,
    };
    let port = parse_env::<u16>("PORT")?.unwrap_or(defaults.port);

    let max_line_quantity = parse_env::<u32>("CART_MAX_LINE_QUANTITY")?.unwrap_or(defaults.max_line_quantity);
    if max_line_quantity == 0 {
        return Err(anyhow!("CART_MAX_LINE_QUANTITY must be at least 1"));
    }

    let store_timeout = parse_env::<u64>("STORE_TIMEOUT_MS")?
        .map(Duration::from_millis)
        .unwrap_or(defaults.store_timeout);
    if store_timeout.is_zero() {
        return Err(anyhow!("STORE_TIMEOUT_MS must be greater than zero"));
    }

    let database_url = env::var("DATABASE_URL")
        .ok()
        .and_then(|value| normalize_optional(&value));
    let seed_demo_catalog = bool_from_env("STOREFRONT_SEED_DEMO").unwrap_or(false);
    let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|value| parse_list(&value))
        .filter(|origins| !origins.is_empty())
        .unwrap_or(defaults.cors_allowed_origins);

    Ok(ServiceConfig {
        host,
        port,
        max_line_quantity,
        store_timeout,
        database_url,
        seed_demo_catalog,
        cors_allowed_origins,
    })
}

fn default_origins() -> Vec<String> {
    ["http://localhost:3000", "http://localhost:3001", "http://localhost:5173"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("Failed to parse {key} '{value}': {err}")),
        Err(_) => Ok(None),
    }
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| parse_bool(&value))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';' || c == ' ')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
