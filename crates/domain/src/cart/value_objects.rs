//! Value objects for the cart domain.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Catalog identifier of a line item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An amount in integer cents, so totals stay exact.
///
/// Serialized as `{"cents": n}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub const ZERO: Money = Money { cents: 0 };

    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub const fn cents(self) -> i64 {
        self.cents
    }

    pub const fn is_negative(self) -> bool {
        self.cents < 0
    }

    /// Price of `quantity` units; saturates instead of wrapping.
    pub fn times(self, quantity: u32) -> Money {
        Money::from_cents(self.cents.saturating_mul(i64::from(quantity)))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money::from_cents(self.cents.saturating_add(rhs.cents))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

/// One line of a cart.
///
/// The subtotal is always computed from price and quantity, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: ItemId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(
        item_id: impl Into<ItemId>,
        name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            unit_price,
            quantity,
        }
    }

    pub fn subtotal(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// Payload the carrier returns once a shipment is booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentReceipt {
    pub status: String,
    pub tracking_id: String,
    pub item_count: u32,
}

/// Why shipment was given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentFailureKind {
    /// The carrier refused the request (4xx); never retried.
    PolicyRejected,
    /// Every attempt of the retry budget failed transiently.
    RetriesExhausted,
}

impl fmt::Display for ShipmentFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipmentFailureKind::PolicyRejected => f.write_str("POLICY_REJECTED"),
            ShipmentFailureKind::RetriesExhausted => f.write_str("RETRIES_EXHAUSTED"),
        }
    }
}

/// Final result of the shipment step, written once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ShipmentResult {
    Scheduled(ShipmentReceipt),
    Failed {
        kind: ShipmentFailureKind,
        error: String,
        attempts: u32,
        status: Option<u16>,
    },
}

impl ShipmentResult {
    pub fn tracking_id(&self) -> Option<&str> {
        match self {
            ShipmentResult::Scheduled(receipt) => Some(&receipt.tracking_id),
            ShipmentResult::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<ShipmentFailureKind> {
        match self {
            ShipmentResult::Scheduled(_) => None,
            ShipmentResult::Failed { kind, .. } => Some(*kind),
        }
    }
}
