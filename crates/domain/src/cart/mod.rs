//! Shopping cart aggregate and related types.

mod aggregate;
mod events;
mod service;
mod snapshot;
mod state;
mod value_objects;

pub use aggregate::{Cart, MAX_QUANTITY_PER_CALL};
pub use events::{
    CartAbandonedData, CartCancelledData, CartEvent, CartOpenedData, CheckoutCompletedData,
    DeliveryConfirmedData, ItemAddedData, ItemRemovedData, ShipmentAttemptFailedData,
    ShipmentFailedData, ShipmentScheduledData, TermsAcceptedData,
};
pub use service::CartService;
pub use snapshot::{CartSnapshot, LifecycleSummary, SnapshotLine};
pub use state::{CartState, LifecycleOutcome};
pub use value_objects::{
    ItemId, LineItem, Money, ShipmentFailureKind, ShipmentReceipt, ShipmentResult,
};

use thiserror::Error;

/// Business rule violations raised by cart commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// The cart is not in a state that accepts the command.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: CartState,
        action: &'static str,
    },

    /// More units requested in one call than the stock ceiling allows.
    #[error("Insufficient stock for {name}: requested {requested}, at most {available} available")]
    StockInsufficient {
        name: String,
        requested: u32,
        available: u32,
    },

    #[error("Terms must be accepted before checkout")]
    TermsNotAccepted,

    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: u32 },

    /// Merging into the existing line would overflow its quantity.
    #[error("Quantity overflow for {item_id}: {existing} in cart plus {added} added")]
    QuantityOverflow {
        item_id: ItemId,
        existing: u32,
        added: u32,
    },

    #[error("Invalid price: {price} cents (must not be negative)")]
    InvalidPrice { price: i64 },

    #[error("Cart already opened")]
    AlreadyOpened,

    #[error("Cart has not been opened")]
    NotOpened,

    /// The shipment outcome was already written.
    #[error("Shipment result already recorded")]
    ShipmentAlreadyRecorded,
}
