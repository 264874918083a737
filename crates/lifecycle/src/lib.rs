//! Durable per-user cart lifecycle engine.
//!
//! Every cart runs as its own controller task that owns the cart aggregate,
//! serializes the commands sent to it, races the abandonment deadline and
//! drives the shipment step once the cart is paid. All state changes are
//! appended to the event store first, so a restarted engine rebuilds every
//! cart, its deadline and its shipment progress by replay.
//!
//! - [`CartEngine`]: user registry, provisioning, recovery and shutdown
//! - [`CartHandle`]: client side of one controller
//! - [`ShipmentOrchestrator`]: retrying shipment dispatch

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod retry;
pub mod shipping;

pub use config::{DEFAULT_SHIPPING_ADDRESS, LifecycleConfig};
pub use controller::{CartController, ControllerExit};
pub use dispatcher::{CartCommand, CartHandle, CartSignal, ItemAccepted, Rejection};
pub use engine::CartEngine;
pub use error::{LifecycleError, Result};
pub use retry::RetryPolicy;
pub use shipping::{
    AttemptJournal, DispatchOutcome, EndpointError, HttpShipmentEndpoint,
    InMemoryShipmentEndpoint, ShipmentEndpoint, ShipmentFailure, ShipmentOrchestrator,
    ShipmentProgress, ShipmentRequest,
};

use tokio::sync::watch;

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is gone without having requested it.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
