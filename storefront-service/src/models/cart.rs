use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MAX_LINE_QUANTITY: u32 = 100;

/// One of the two independent baskets each user owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CartSlot(u8);

impl CartSlot {
    pub const FIRST: CartSlot = CartSlot(1);
    pub const SECOND: CartSlot = CartSlot(2);

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CartSlot {
    type Error = CartError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 | 2 => Ok(CartSlot(value)),
            other => Err(CartError::InvalidSlot(other.to_string())),
        }
    }
}

impl From<CartSlot> for u8 {
    fn from(slot: CartSlot) -> Self {
        slot.0
    }
}

impl FromStr for CartSlot {
    type Err = CartError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u8>()
            .map_err(|_| CartError::InvalidSlot(value.to_string()))
            .and_then(CartSlot::try_from)
    }
}

impl fmt::Display for CartSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    #[error("cart slot '{0}' does not exist")]
    InvalidSlot(String),
    #[error("quantity change must not be zero")]
    ZeroDelta,
    #[error("line quantity {requested} exceeds the limit of {cap}")]
    QuantityExceedsCap { requested: i64, cap: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub owner_id: Uuid,
    pub slot: CartSlot,
    /// Bumped by every mutation, including clears. Never reused for a slot.
    pub version: i64,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// The view of a slot that has never been touched.
    pub fn empty(owner_id: Uuid, slot: CartSlot) -> Self {
        Self {
            owner_id,
            slot,
            version: 0,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add `delta` to the line for `product_id`. Lines that drop to zero or
    /// below are removed; new lines keep insertion order.
    pub fn apply_delta(&mut self, product_id: Uuid, delta: i64, cap: u32) -> Result<(), CartError> {
        if delta == 0 {
            return Err(CartError::ZeroDelta);
        }
        let position = self.items.iter().position(|item| item.product_id == product_id);
        let current = position.map(|idx| i64::from(self.items[idx].quantity)).unwrap_or(0);
        let requested = current.saturating_add(delta);
        if requested > i64::from(cap) {
            return Err(CartError::QuantityExceedsCap { requested, cap });
        }

        match (position, u32::try_from(requested)) {
            (Some(idx), Ok(quantity)) if quantity > 0 => self.items[idx].quantity = quantity,
            (Some(idx), _) => {
                self.items.remove(idx);
            }
            (None, Ok(quantity)) if quantity > 0 => self.items.push(CartItem { product_id, quantity }),
            (None, _) => return Ok(()),
        }
        self.touch();
        Ok(())
    }

    /// Empty the cart when nobody has modified it since `expected_version` was read.
    pub fn clear_if_version(&mut self, expected_version: i64) -> bool {
        if self.version != expected_version {
            return false;
        }
        self.items.clear();
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
