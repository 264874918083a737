//! Read views of a cart.

use std::collections::BTreeMap;

use common::UserId;
use serde::{Deserialize, Serialize};

use super::{CartState, ItemId, LifecycleOutcome, LineItem, Money, ShipmentResult};

/// A line as shown to readers, with its derived subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub subtotal: Money,
}

impl From<&LineItem> for SnapshotLine {
    fn from(line: &LineItem) -> Self {
        Self {
            name: line.name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
            subtotal: line.subtotal(),
        }
    }
}

/// Immutable answer to a snapshot query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub items: BTreeMap<ItemId, SnapshotLine>,
    pub total: Money,
    pub state: CartState,
    pub terms_accepted: bool,
}

/// Frozen record of a finished cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSummary {
    pub cart_id: String,
    pub user_id: UserId,
    pub terms_accepted: bool,
    pub items: BTreeMap<ItemId, SnapshotLine>,
    pub total: Money,
    pub shipment_result: Option<ShipmentResult>,
    pub state: CartState,
    pub lifecycle_outcome: LifecycleOutcome,
}
