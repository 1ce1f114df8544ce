use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common_money::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::cart::CartSlot;
use super::credentials::Profile;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown order status '{0}'")]
    UnknownStatus(String),
    #[error("unknown payment status '{0}'")]
    UnknownPaymentStatus(String),
    #[error("cannot move order from {from} to {to}")]
    Invalid { from: OrderStatus, to: OrderStatus },
}

/// Fulfilment lifecycle: `pending -> processed -> paid -> shipped`, with
/// `cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processed,
    Paid,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processed => "processed",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processed => 1,
            OrderStatus::Paid => 2,
            OrderStatus::Shipped => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    /// Forward moves only; intermediate states may be skipped.
    pub fn transition_to(self, next: OrderStatus) -> Result<OrderStatus, TransitionError> {
        let allowed = !self.is_terminal()
            && (next == OrderStatus::Cancelled || next.rank() > self.rank());
        if allowed {
            Ok(next)
        } else {
            Err(TransitionError::Invalid { from: self, to: next })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processed" => Ok(OrderStatus::Processed),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(TransitionError::UnknownStatus(value.to_string())),
        }
    }
}

/// Set by the payment collaborator, independent of fulfilment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(TransitionError::UnknownPaymentStatus(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub price_at_purchase: Money,
}

/// Delivery contact copied from the buyer's profile at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerSnapshot {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub phone2: String,
    pub email: String,
}

impl From<&Profile> for BuyerSnapshot {
    fn from(profile: &Profile) -> Self {
        Self {
            name: profile.display_name(),
            address: profile.address.clone(),
            phone: profile.phone1.clone(),
            phone2: profile.phone2.clone(),
            email: profile.email.clone(),
        }
    }
}

/// Identifies the exact cart contents an order was built from. At most one
/// order may claim a given `(owner, slot, version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartClaim {
    pub owner_id: Uuid,
    pub slot: CartSlot,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub purchase_id: String,
    pub owner_id: Uuid,
    pub source_cart: CartClaim,
    pub lines: Vec<OrderLine>,
    pub total_price: Money,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub buyer: BuyerSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn forward_path_and_skips_are_allowed() {
        assert_eq!(Pending.transition_to(Processed), Ok(Processed));
        assert_eq!(Processed.transition_to(Paid), Ok(Paid));
        assert_eq!(Paid.transition_to(Shipped), Ok(Shipped));
        assert_eq!(Pending.transition_to(Shipped), Ok(Shipped));
    }

    #[test]
    fn cancel_from_any_open_state() {
        for from in [Pending, Processed, Paid] {
            assert_eq!(from.transition_to(Cancelled), Ok(Cancelled));
        }
    }

    #[test]
    fn regressions_self_moves_and_terminal_exits_are_rejected() {
        let rejected = [
            (Paid, Pending),
            (Processed, Processed),
            (Shipped, Cancelled),
            (Cancelled, Pending),
            (Cancelled, Cancelled),
            (Shipped, Shipped),
        ];
        for (from, to) in rejected {
            assert_eq!(from.transition_to(to), Err(TransitionError::Invalid { from, to }));
        }
    }

    #[test]
    fn status_names_use_an_allow_list() {
        assert_eq!("Shipped".parse::<OrderStatus>(), Ok(Shipped));
        assert!(matches!("delivered".parse::<OrderStatus>(), Err(TransitionError::UnknownStatus(_))));
        assert_eq!("paid".parse::<PaymentStatus>(), Ok(PaymentStatus::Paid));
        assert!("refunded".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn buyer_snapshot_copies_profile() {
        let profile = Profile {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            address: "12 St James's Square".into(),
            phone1: "555-0100".into(),
            ..Profile::default()
        };
        let buyer = BuyerSnapshot::from(&profile);
        assert_eq!(buyer.name, "Ada Lovelace");
        assert_eq!(buyer.phone, "555-0100");
    }
}
