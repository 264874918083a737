//! Durable, append-only event log.
//!
//! Each cart instance owns one stream keyed by its [`AggregateId`]. Streams
//! are versioned for optimistic concurrency and replayed in version order.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore};
