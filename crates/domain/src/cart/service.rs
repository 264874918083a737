//! Cart service wrapping the command handler.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{AggregateId, UserId};
use event_store::{EventEnvelope, EventStore};

use crate::aggregate::Aggregate;
use crate::command::CommandHandler;
use crate::error::DomainError;

use super::{Cart, CartError, CartEvent};

/// Persistence-facing API for carts.
///
/// Carts are kept in memory by their owner; this service opens new streams,
/// commits commands against a borrowed cart and replays carts back from the
/// log after a restart.
pub struct CartService<S: EventStore> {
    handler: CommandHandler<S, Cart>,
}

impl<S: EventStore + Clone> Clone for CartService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<S: EventStore> CartService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Cart> {
        &self.handler
    }

    /// Opens a new cart instance whose abandonment deadline lies
    /// `abandon_after` from now.
    #[tracing::instrument(skip(self))]
    pub async fn open_cart(&self, user_id: UserId, abandon_after: Duration) -> Result<Cart, DomainError> {
        let instance_id = AggregateId::new();
        let opened_at = Utc::now();
        let abandon_at = TimeDelta::from_std(abandon_after)
            .ok()
            .and_then(|delta| opened_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let cart = self
            .handler
            .create(instance_id, |cart| {
                cart.open(instance_id, user_id, opened_at, abandon_at)
            })
            .await?;

        tracing::info!(cart_id = cart.cart_id(), %abandon_at, "cart opened");
        Ok(cart)
    }

    /// Replays a cart; `None` when no stream exists under `instance_id`.
    pub async fn load(&self, instance_id: AggregateId) -> Result<Option<Cart>, DomainError> {
        self.handler.load_existing(instance_id).await
    }

    /// Runs a cart command and commits what it produces.
    pub async fn execute<F>(&self, cart: &mut Cart, command_fn: F) -> Result<Vec<CartEvent>, DomainError>
    where
        F: FnOnce(&Cart) -> Result<Vec<CartEvent>, CartError>,
    {
        self.handler.execute(cart, command_fn).await
    }

    pub async fn history(&self, instance_id: AggregateId) -> Result<Vec<EventEnvelope>, DomainError> {
        self.handler.history(instance_id).await
    }

    /// Every cart instance ever opened, oldest first.
    pub async fn cart_ids(&self) -> Result<Vec<AggregateId>, DomainError> {
        Ok(self
            .handler
            .store()
            .aggregate_ids_by_type(Cart::aggregate_type())
            .await?)
    }
}
