use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Concurrency expectation for one append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Version the writer believes the stream is at. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// No expectation; only the per-version uniqueness guards the write.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The stream must not exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }

    /// Fails with a conflict when `actual` does not meet the expectation.
    pub(crate) fn check(&self, aggregate_id: AggregateId, actual: Version) -> Result<()> {
        match self.expected_version {
            Some(expected) if expected != actual => Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

/// Durable home of every cart stream.
///
/// Implementations are shared by all cart tasks, hence `Send + Sync`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch atomically and returns the stream's new version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// One stream in version order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Events of one type across all streams, oldest first.
    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// `None` for a stream with no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Streams of one kind, in the order they were opened.
    async fn aggregate_ids_by_type(&self, aggregate_type: &str) -> Result<Vec<AggregateId>>;
}

/// The stream a batch targets and the version it starts at.
///
/// A batch must be non-empty, stay inside one stream and use consecutive
/// versions.
pub(crate) fn batch_target(events: &[EventEnvelope]) -> Result<(AggregateId, Version)> {
    let first = events
        .first()
        .ok_or(EventStoreError::InvalidAppend("empty batch"))?;

    if events.iter().any(|event| !event.same_stream(first)) {
        return Err(EventStoreError::InvalidAppend("batch spans several streams"));
    }

    let start = first.version.as_i64();
    let consecutive = events
        .iter()
        .zip(start..)
        .all(|(event, expected)| event.version.as_i64() == expected);
    if !consecutive {
        return Err(EventStoreError::InvalidAppend("batch versions are not consecutive"));
    }

    Ok((first.aggregate_id, first.version))
}
