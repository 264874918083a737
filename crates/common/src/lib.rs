//! Identifiers shared across the cart lifecycle workspace.

pub mod types;

pub use types::{AggregateId, UserId};
