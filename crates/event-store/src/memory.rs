use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{AppendOptions, EventStore, batch_target};
use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Event store kept in process memory, one vector per stream.
///
/// Clones share the same streams, so a test can drop an engine and build a
/// new one over the same store to simulate a restart.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, Vec<EventEnvelope>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events over all streams.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }
}

fn head(stream: Option<&Vec<EventEnvelope>>) -> Version {
    stream
        .and_then(|events| events.last())
        .map_or(Version::initial(), |event| event.version)
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let (aggregate_id, start) = batch_target(&events)?;

        let mut streams = self.streams.write().await;
        let current = head(streams.get(&aggregate_id));
        options.check(aggregate_id, current)?;

        // Same rule as the unique (aggregate_id, version) constraint in SQL.
        if start != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        metrics::counter!("event_store_events_appended_total", "backend" => "memory")
            .increment(events.len() as u64);
        let stream = streams.entry(aggregate_id).or_default();
        stream.extend(events);
        Ok(head(Some(stream)))
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        Ok(self
            .streams
            .read()
            .await
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        let mut matching: Vec<_> = streams
            .values()
            .flatten()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect();
        matching.sort_by_key(|event| event.timestamp);
        Ok(matching)
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .and_then(|events| events.last())
            .map(|event| event.version))
    }

    async fn aggregate_ids_by_type(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let streams = self.streams.read().await;
        let mut opened: Vec<_> = streams
            .values()
            .filter_map(|events| events.first())
            .filter(|first| first.opens_stream() && first.aggregate_type == aggregate_type)
            .map(|first| (first.timestamp, first.aggregate_id))
            .collect();
        opened.sort_unstable();
        Ok(opened.into_iter().map(|(_, id)| id).collect())
    }
}
