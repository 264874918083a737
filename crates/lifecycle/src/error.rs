use common::UserId;
use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

use crate::dispatcher::Rejection;

/// Errors raised by the cart engine and its controllers.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A validated command was refused; nothing was recorded.
    #[error("command rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("no cart for user {0}")]
    CartNotFound(UserId),

    /// The cart's controller is gone, or the engine is shutting down.
    #[error("cart unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("event log: {0}")]
    EventStore(#[from] EventStoreError),
}

impl LifecycleError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            LifecycleError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// A concurrent writer advanced the cart's stream first.
    pub fn is_conflict(&self) -> bool {
        match self {
            LifecycleError::Domain(err) => err.is_conflict(),
            LifecycleError::EventStore(err) => err.is_conflict(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
