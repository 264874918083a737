//! Cart domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{ItemId, LineItem, Money, ShipmentFailureKind, ShipmentReceipt};

/// Everything that can happen to a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CartEvent {
    /// A cart instance was provisioned; carries the abandonment deadline.
    CartOpened(CartOpenedData),

    /// Units of an item were added. Merges into an existing line.
    ItemAdded(ItemAddedData),

    ItemRemoved(ItemRemovedData),

    TermsAccepted(TermsAcceptedData),

    /// Checkout completed; the cart is paid.
    CheckoutCompleted(CheckoutCompletedData),

    CartCancelled(CartCancelledData),

    /// The deadline elapsed before checkout.
    CartAbandoned(CartAbandonedData),

    /// One shipment attempt failed. Recorded per attempt so that retries
    /// resume from the right count after a restart.
    ShipmentAttemptFailed(ShipmentAttemptFailedData),

    ShipmentScheduled(ShipmentScheduledData),

    /// Shipment was given up for good.
    ShipmentFailed(ShipmentFailedData),

    DeliveryConfirmed(DeliveryConfirmedData),
}

impl DomainEvent for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened(_) => "CartOpened",
            CartEvent::ItemAdded(_) => "ItemAdded",
            CartEvent::ItemRemoved(_) => "ItemRemoved",
            CartEvent::TermsAccepted(_) => "TermsAccepted",
            CartEvent::CheckoutCompleted(_) => "CheckoutCompleted",
            CartEvent::CartCancelled(_) => "CartCancelled",
            CartEvent::CartAbandoned(_) => "CartAbandoned",
            CartEvent::ShipmentAttemptFailed(_) => "ShipmentAttemptFailed",
            CartEvent::ShipmentScheduled(_) => "ShipmentScheduled",
            CartEvent::ShipmentFailed(_) => "ShipmentFailed",
            CartEvent::DeliveryConfirmed(_) => "DeliveryConfirmed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpenedData {
    pub instance_id: AggregateId,
    pub cart_id: String,
    pub user_id: UserId,
    pub opened_at: DateTime<Utc>,
    /// Absolute wall-clock deadline; restarts resume it instead of starting over.
    pub abandon_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub item_id: ItemId,
    pub name: String,
    pub unit_price: Money,
    /// Units added by this event, not the resulting line quantity.
    pub quantity: u32,
}

impl From<ItemAddedData> for LineItem {
    fn from(data: ItemAddedData) -> Self {
        LineItem {
            item_id: data.item_id,
            name: data.name,
            unit_price: data.unit_price,
            quantity: data.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub item_id: ItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsAcceptedData {
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCompletedData {
    pub total: Money,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartAbandonedData {
    pub deadline: DateTime<Utc>,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentAttemptFailedData {
    /// 1-based attempt number.
    pub attempt: u32,
    pub retryable: bool,
    pub status: Option<u16>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentScheduledData {
    pub receipt: ShipmentReceipt,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentFailedData {
    pub kind: ShipmentFailureKind,
    pub error: String,
    pub attempts: u32,
    pub status: Option<u16>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmedData {
    pub confirmed_at: DateTime<Utc>,
}

// Convenience constructors
impl CartEvent {
    pub fn cart_opened(
        instance_id: AggregateId,
        user_id: UserId,
        opened_at: DateTime<Utc>,
        abandon_at: DateTime<Utc>,
    ) -> Self {
        CartEvent::CartOpened(CartOpenedData {
            instance_id,
            cart_id: user_id.cart_key(instance_id),
            user_id,
            opened_at,
            abandon_at,
        })
    }

    pub fn item_added(item: &LineItem) -> Self {
        CartEvent::ItemAdded(ItemAddedData {
            item_id: item.item_id.clone(),
            name: item.name.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity,
        })
    }

    pub fn item_removed(item_id: ItemId) -> Self {
        CartEvent::ItemRemoved(ItemRemovedData { item_id })
    }

    pub fn terms_accepted() -> Self {
        CartEvent::TermsAccepted(TermsAcceptedData {
            accepted_at: Utc::now(),
        })
    }

    pub fn checkout_completed(total: Money) -> Self {
        CartEvent::CheckoutCompleted(CheckoutCompletedData {
            total,
            completed_at: Utc::now(),
        })
    }

    pub fn cart_cancelled(reason: impl Into<String>) -> Self {
        CartEvent::CartCancelled(CartCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }

    pub fn cart_abandoned(deadline: DateTime<Utc>) -> Self {
        CartEvent::CartAbandoned(CartAbandonedData {
            deadline,
            abandoned_at: Utc::now(),
        })
    }

    pub fn shipment_attempt_failed(
        attempt: u32,
        retryable: bool,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        CartEvent::ShipmentAttemptFailed(ShipmentAttemptFailedData {
            attempt,
            retryable,
            status,
            error: error.into(),
            failed_at: Utc::now(),
        })
    }

    pub fn shipment_scheduled(receipt: ShipmentReceipt, attempt: u32) -> Self {
        CartEvent::ShipmentScheduled(ShipmentScheduledData {
            receipt,
            attempt,
            scheduled_at: Utc::now(),
        })
    }

    pub fn shipment_failed(
        kind: ShipmentFailureKind,
        error: impl Into<String>,
        attempts: u32,
        status: Option<u16>,
    ) -> Self {
        CartEvent::ShipmentFailed(ShipmentFailedData {
            kind,
            error: error.into(),
            attempts,
            status,
            failed_at: Utc::now(),
        })
    }

    pub fn delivery_confirmed() -> Self {
        CartEvent::DeliveryConfirmed(DeliveryConfirmedData {
            confirmed_at: Utc::now(),
        })
    }
}
