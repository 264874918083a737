use thiserror::Error;

use crate::{AggregateId, Version};

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer advanced the stream after this one last read it.
    #[error("stream {aggregate_id} is at version {actual}, writer expected {expected}")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The batch handed to `append` was malformed.
    #[error("invalid append: {0}")]
    InvalidAppend(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("event payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// True when retrying after a fresh read could succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, EventStoreError>;
