//! Domain layer of the cart lifecycle engine.
//!
//! - [`Aggregate`] and [`DomainEvent`]: event-sourced entity traits
//! - [`CommandHandler`]: persists the events a command produces
//! - [`cart`]: the cart aggregate, its state machine and events

pub mod aggregate;
pub mod cart;
pub mod command;
pub mod error;

pub use aggregate::{Aggregate, DomainEvent};
pub use cart::{
    Cart, CartError, CartEvent, CartService, CartSnapshot, CartState, ItemId, LifecycleOutcome,
    LifecycleSummary, LineItem, MAX_QUANTITY_PER_CALL, Money, ShipmentFailureKind,
    ShipmentReceipt, ShipmentResult, SnapshotLine,
};
pub use command::CommandHandler;
pub use error::DomainError;
