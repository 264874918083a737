//! Shipment side effect: endpoint contract, implementations and the
//! retrying orchestrator.

mod endpoint;
mod http;
mod memory;
mod orchestrator;

pub use endpoint::{EndpointError, ShipmentEndpoint, ShipmentLine, ShipmentRequest};
pub use http::{DEFAULT_REQUEST_TIMEOUT, HttpShipmentEndpoint};
pub use memory::InMemoryShipmentEndpoint;
pub use orchestrator::{
    AttemptJournal, DispatchOutcome, ShipmentFailure, ShipmentOrchestrator, ShipmentProgress,
};
