use std::fmt;
use std::iter::Sum;

use bigdecimal::{BigDecimal, Signed, ToPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount overflows the representable range")]
    Overflow,
    #[error("amount must not be negative")]
    Negative,
}

/// Normalize a monetary value to 2 decimal places (truncating extra digits).
pub fn normalize_scale(value: &BigDecimal) -> BigDecimal {
    value.with_scale(2)
}

/// Monetary amount in minor units (cents). Serializes as a bare integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(minor: i64) -> Self { Self(minor) }
    pub fn minor(&self) -> i64 { self.0 }

    /// Parse a decimal major-unit amount (e.g. a NUMERIC column), rounding half-up to cents.
    pub fn from_decimal(value: &BigDecimal) -> Result<Self, MoneyError> {
        if value.is_negative() {
            return Err(MoneyError::Negative);
        }
        let scaled = value.clone() * BigDecimal::from(100) + BigDecimal::new(5.into(), 1);
        scaled
            .with_scale(0)
            .to_i64()
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    pub fn to_decimal(&self) -> BigDecimal {
        normalize_scale(&(BigDecimal::from(self.0) / BigDecimal::from(100)))
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Sum for Money {
    /// Saturating sum; use [`sum_lines`] when overflow must be detected.
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| Money(acc.0.saturating_add(m.0)))
    }
}

/// `unit_price × quantity` with overflow detection.
pub fn line_total(unit_price: Money, quantity: u32) -> Result<Money, MoneyError> {
    unit_price.checked_mul(quantity).ok_or(MoneyError::Overflow)
}

/// Exact Σ(unit_price × quantity) over order lines.
pub fn sum_lines<I>(lines: I) -> Result<Money, MoneyError>
where
    I: IntoIterator<Item = (Money, u32)>,
{
    lines.into_iter().try_fold(Money::ZERO, |acc, (price, qty)| {
        acc.checked_add(line_total(price, qty)?).ok_or(MoneyError::Overflow)
    })
}
