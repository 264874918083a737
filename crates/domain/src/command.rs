//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Writes command outcomes to the log for one kind of aggregate.
///
/// The handler never keeps aggregates itself. A cart task owns its cart for
/// its whole life and lends it here as `&mut A`; events are applied to it
/// only once the append has succeeded, so a failed write leaves the
/// in-memory state where it was.
pub struct CommandHandler<S, A> {
    store: S,
    aggregate: PhantomData<fn() -> A>,
}

impl<S: Clone, A> Clone for CommandHandler<S, A> {
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<S, A> CommandHandler<S, A> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            aggregate: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Folds a stream into a fresh aggregate. An empty stream yields
    /// `A::default()`.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let stream = self.store.get_events_for_aggregate(aggregate_id).await?;
        stream
            .iter()
            .try_fold(A::default(), |mut aggregate, envelope| -> Result<A, DomainError> {
                aggregate.apply(envelope.decode::<A::Event>()?);
                aggregate.set_version(envelope.version);
                Ok(aggregate)
            })
    }

    /// Like [`load`](Self::load), but `None` when the stream was never started.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.is_started().then_some(aggregate))
    }

    /// Starts a stream under `aggregate_id` with what `command_fn` decides.
    pub async fn create<F>(&self, aggregate_id: AggregateId, command_fn: F) -> Result<A, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = A::default();
        let events = command_fn(&aggregate)?;
        self.append_and_apply(aggregate_id, &mut aggregate, events)
            .await?;
        Ok(aggregate)
    }

    /// Decides with `command_fn`, then commits and returns the new events.
    ///
    /// An empty list means the command was accepted but changed nothing.
    pub async fn execute<F>(
        &self,
        aggregate: &mut A,
        command_fn: F,
    ) -> Result<Vec<A::Event>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let events = command_fn(aggregate)?;
        self.commit(aggregate, events.clone()).await?;
        Ok(events)
    }

    /// Appends `events` after the aggregate's version, then applies them.
    pub async fn commit(&self, aggregate: &mut A, events: Vec<A::Event>) -> Result<Version, DomainError> {
        let Some(aggregate_id) = aggregate.id() else {
            return Err(DomainError::Uninitialized {
                aggregate_type: A::aggregate_type(),
            });
        };
        self.append_and_apply(aggregate_id, aggregate, events).await
    }

    /// Appends events after `current_version` without touching any aggregate.
    ///
    /// For callers whose aggregate is borrowed elsewhere; they apply the
    /// events themselves once they get it back.
    pub async fn record(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Version, DomainError> {
        if events.is_empty() {
            return Ok(current_version);
        }

        let envelopes = current_version
            .following(events.len())
            .zip(events)
            .map(|(version, event)| {
                EventEnvelope::encode(
                    A::aggregate_type(),
                    aggregate_id,
                    version,
                    event.event_type(),
                    event,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let expectation = if current_version == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current_version)
        };
        let recorded = self.store.append(envelopes, expectation).await?;
        metrics::counter!("cart_events_recorded_total").increment(events.len() as u64);
        Ok(recorded)
    }

    /// Every event of one stream, oldest first.
    pub async fn history(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>, DomainError> {
        Ok(self.store.get_events_for_aggregate(aggregate_id).await?)
    }

    async fn append_and_apply(
        &self,
        aggregate_id: AggregateId,
        aggregate: &mut A,
        events: Vec<A::Event>,
    ) -> Result<Version, DomainError> {
        let version = self
            .record(aggregate_id, aggregate.version(), &events)
            .await?;
        aggregate.apply_events(events);
        aggregate.set_version(version);
        Ok(version)
    }
}
