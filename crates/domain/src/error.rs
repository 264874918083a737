use event_store::EventStoreError;
use thiserror::Error;

use crate::cart::CartError;

/// Failure to run a command against the log.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The cart refused the command.
    #[error(transparent)]
    Cart(#[from] CartError),

    #[error("event log: {0}")]
    EventStore(#[from] EventStoreError),

    /// A command reached an aggregate whose stream was never opened.
    #[error("{aggregate_type} has no stream yet")]
    Uninitialized { aggregate_type: &'static str },

    #[error("event payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// The business rule violation, if this error is one.
    pub fn as_cart_error(&self) -> Option<&CartError> {
        match self {
            DomainError::Cart(err) => Some(err),
            _ => None,
        }
    }

    /// Another writer got to the stream first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(err) if err.is_conflict())
    }
}
