//! Event-sourced entity traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded in a stream. The type name is stored next to the payload
/// so the log can be filtered by kind.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn event_type(&self) -> &'static str;
}

/// An entity whose state is the fold of its events.
///
/// Command methods only look at the state and return events. The state
/// itself changes in [`apply`](Aggregate::apply) alone, which must be
/// deterministic and infallible: replay calls it once per recorded event
/// and has to arrive at the same value every time.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;
    type Error: std::error::Error + Send + Sync;

    /// Stream kind, e.g. `"Cart"`.
    fn aggregate_type() -> &'static str;

    /// `None` until the opening event has been applied.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        events.into_iter().for_each(|event| self.apply(event));
    }

    /// Whether an opening event has been applied.
    fn is_started(&self) -> bool {
        self.id().is_some()
    }
}
