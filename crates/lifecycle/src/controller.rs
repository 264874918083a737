//! Per-cart lifecycle controller.
//!
//! One controller task owns one cart. It applies the commands from its
//! mailbox one at a time and moves the cart along
//!
//! ```text
//! OPEN ──► PAID ──► SHIPPED ──► DELIVERED
//!   │        └──► shipment failed
//!   ├──► CANCELLED
//!   └──► ABANDONED
//! ```
//!
//! In OPEN the mailbox races the abandonment deadline inside a single
//! `select!`, so nothing can be applied once the deadline has fired. In PAID
//! the shipment is dispatched while the mailbox keeps being answered with
//! the gates of the PAID state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, UserId};
use domain::{
    Aggregate, Cart, CartEvent, CartService, CartState, CommandHandler, DomainError,
    LifecycleOutcome, LifecycleSummary, LineItem,
};
use event_store::{EventStore, Version};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::LifecycleConfig;
use crate::dispatcher::{
    CartCommand, CartHandle, CartSignal, ItemAccepted, Rejection, record_dropped_signal,
};
use crate::error::{LifecycleError, Result};
use crate::shipping::{
    AttemptJournal, DispatchOutcome, EndpointError, ShipmentEndpoint, ShipmentOrchestrator,
    ShipmentProgress, ShipmentRequest,
};
use crate::shutdown_requested;

/// Deadlines further out than this are treated as never.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// How a controller task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerExit {
    Finished(LifecycleOutcome),
    /// Shutdown was requested; the cart resumes from its log on restart.
    Suspended,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Advanced,
    Suspend,
}

pub struct CartController<S: EventStore, E> {
    cart: Cart,
    user_id: UserId,
    instance_id: AggregateId,
    service: CartService<S>,
    orchestrator: Arc<ShipmentOrchestrator<E>>,
    shipping_address: String,
    mailbox: mpsc::Receiver<CartCommand>,
    shutdown: watch::Receiver<bool>,
    summary: watch::Sender<Option<LifecycleSummary>>,
}

impl<S, E> CartController<S, E>
where
    S: EventStore + Clone,
    E: ShipmentEndpoint,
{
    /// Wraps an opened (or replayed) cart and returns its handle.
    pub fn new(
        cart: Cart,
        service: CartService<S>,
        orchestrator: Arc<ShipmentOrchestrator<E>>,
        config: &LifecycleConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, CartHandle)> {
        let (instance_id, user_id) = match (cart.id(), cart.user_id()) {
            (Some(id), Some(user)) => (id, user.clone()),
            _ => {
                return Err(LifecycleError::Unavailable(
                    "cannot run a cart that was never opened".to_string(),
                ));
            }
        };

        let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (summary, summary_rx) = watch::channel(cart.summary());
        let handle = CartHandle::new(&cart, user_id.clone(), instance_id, sender, summary_rx);

        let controller = Self {
            cart,
            user_id,
            instance_id,
            service,
            orchestrator,
            shipping_address: config.shipping_address.clone(),
            mailbox,
            shutdown,
            summary,
        };
        Ok((controller, handle))
    }

    /// Drives the cart until its lifecycle ends or shutdown is requested.
    pub async fn run(mut self) -> Result<ControllerExit> {
        loop {
            if let Some(outcome) = self.cart.outcome() {
                self.finish(outcome).await;
                return Ok(ControllerExit::Finished(outcome));
            }

            let step = match self.cart.state() {
                CartState::Open => {
                    let deadline = self.abandon_deadline();
                    self.serve(Some(deadline)).await?
                }
                CartState::Paid => self.ship().await?,
                CartState::Shipped => self.serve(None).await?,
                state => {
                    return Err(LifecycleError::Unavailable(format!(
                        "cart in {state} has no lifecycle outcome"
                    )));
                }
            };

            if step == Step::Suspend {
                tracing::info!(state = %self.cart.state(), "cart controller suspended");
                self.drain("controller suspended").await;
                return Ok(ControllerExit::Suspended);
            }
        }
    }

    /// The recorded wall-clock deadline, translated to the runtime clock.
    fn abandon_deadline(&self) -> Instant {
        let remaining = self
            .cart
            .abandon_at()
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        let now = Instant::now();
        now.checked_add(remaining.min(FAR_FUTURE))
            .unwrap_or(now + FAR_FUTURE)
    }

    /// Applies commands until the state changes, the deadline fires or
    /// shutdown is requested.
    async fn serve(&mut self, deadline: Option<Instant>) -> Result<Step> {
        let entry_state = self.cart.state();
        let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                () = &mut sleep, if deadline.is_some() => {
                    self.abandon().await?;
                    return Ok(Step::Advanced);
                }
                () = shutdown_requested(&mut self.shutdown) => return Ok(Step::Suspend),
                Some(command) = self.mailbox.recv() => {
                    // The timer may not have been polled yet when the runtime
                    // was busy past the deadline.
                    if deadline.is_some_and(|at| Instant::now() >= at) {
                        self.abandon().await?;
                        answer_frozen(&self.cart, command, "cart abandoned");
                        return Ok(Step::Advanced);
                    }
                    self.handle(command).await;
                    if self.cart.state() != entry_state || self.cart.is_terminal() {
                        return Ok(Step::Advanced);
                    }
                }
            }
        }
    }

    async fn handle(&mut self, command: CartCommand) {
        match command {
            CartCommand::Signal(signal) => self.apply_signal(signal).await,
            CartCommand::AddItemValidated { item, reply } => {
                let result = self.add_item_validated(item).await;
                let _ = reply.send(result);
            }
            CartCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.cart.snapshot());
            }
        }
    }

    async fn apply_signal(&mut self, signal: CartSignal) {
        metrics::counter!("cart_commands_total", "kind" => signal.kind()).increment(1);

        let result = self
            .service
            .execute(&mut self.cart, |cart| signal.decide(cart))
            .await;

        match result {
            Ok(events) => {
                tracing::debug!(signal = signal.kind(), recorded = events.len(), "signal applied");
            }
            Err(DomainError::Cart(err)) => {
                record_dropped_signal(signal.kind(), self.cart.cart_id(), &err);
            }
            Err(err) => {
                tracing::error!(signal = signal.kind(), error = %err, "failed to record signal");
            }
        }
    }

    async fn add_item_validated(&mut self, item: LineItem) -> Result<ItemAccepted> {
        metrics::counter!("cart_commands_total", "kind" => "add_item_validated").increment(1);

        let state = self.cart.state();
        let candidate = item.clone();
        let result = self
            .service
            .execute(&mut self.cart, |cart| cart.add_item_validated(candidate))
            .await;

        match result {
            Ok(_) => Ok(ItemAccepted {
                message: format!("added {} x {}", item.quantity, item.name),
                new_total: self.cart.total(),
                item,
            }),
            Err(DomainError::Cart(err)) => {
                let rejection = Rejection::from_cart_error(&err, &item, state);
                tracing::info!(code = rejection.code(), item_id = %item.item_id, "validated add rejected");
                Err(rejection.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn abandon(&mut self) -> Result<()> {
        self.service.execute(&mut self.cart, Cart::abandon).await?;
        tracing::info!(deadline = ?self.cart.abandon_at(), "cart abandoned");
        Ok(())
    }

    /// Runs the shipment step for a paid cart.
    async fn ship(&mut self) -> Result<Step> {
        let request = ShipmentRequest::from_snapshot(
            self.user_id.clone(),
            &self.cart.snapshot(),
            self.shipping_address.clone(),
        );
        let progress = ShipmentProgress::of(&self.cart);
        let mut journal = EventJournal {
            handler: self.service.handler(),
            instance_id: self.instance_id,
            version: self.cart.version(),
            recorded: Vec::new(),
        };

        let outcome = {
            let dispatch =
                self.orchestrator
                    .dispatch(&request, progress, &mut journal, &mut self.shutdown);
            tokio::pin!(dispatch);

            loop {
                tokio::select! {
                    outcome = &mut dispatch => break outcome,
                    Some(command) = self.mailbox.recv() => {
                        answer_frozen(&self.cart, command, "shipment in progress");
                    }
                }
            }
        };

        let EventJournal {
            version, recorded, ..
        } = journal;
        self.cart.apply_events(recorded);
        self.cart.set_version(version);

        match outcome? {
            DispatchOutcome::Scheduled { receipt, attempt } => {
                self.service
                    .execute(&mut self.cart, |cart| {
                        cart.record_shipment_scheduled(receipt, attempt)
                    })
                    .await?;
                Ok(Step::Advanced)
            }
            DispatchOutcome::Failed(failure) => {
                tracing::warn!(kind = %failure.kind, attempts = failure.attempts, error = %failure.error, "shipment failed");
                self.service
                    .execute(&mut self.cart, |cart| {
                        cart.record_shipment_failure(
                            failure.kind,
                            failure.error,
                            failure.attempts,
                            failure.status,
                        )
                    })
                    .await?;
                Ok(Step::Advanced)
            }
            DispatchOutcome::Interrupted => Ok(Step::Suspend),
        }
    }

    async fn finish(&mut self, outcome: LifecycleOutcome) {
        metrics::counter!("cart_lifecycle_outcomes_total", "outcome" => outcome.as_str())
            .increment(1);
        tracing::info!(%outcome, total = %self.cart.total(), "cart lifecycle finished");
        self.summary.send_replace(self.cart.summary());
        self.drain("lifecycle finished").await;
    }

    /// Stops accepting commands and answers the ones already queued.
    async fn drain(&mut self, reason: &'static str) {
        self.mailbox.close();
        while let Some(command) = self.mailbox.recv().await {
            answer_frozen(&self.cart, command, reason);
        }
    }
}

/// Answers a command without changing the cart.
fn answer_frozen(cart: &Cart, command: CartCommand, reason: &'static str) {
    match command {
        CartCommand::Signal(signal) => match signal.decide(cart) {
            Err(err) => record_dropped_signal(signal.kind(), cart.cart_id(), &err),
            Ok(_) => record_dropped_signal(signal.kind(), cart.cart_id(), &reason),
        },
        CartCommand::AddItemValidated { item, reply } => {
            let result = match cart.add_item_validated(item.clone()) {
                Err(err) => Err(Rejection::from_cart_error(&err, &item, cart.state()).into()),
                Ok(_) => Err(LifecycleError::Unavailable(reason.to_string())),
            };
            let _ = reply.send(result);
        }
        CartCommand::GetSnapshot { reply } => {
            let _ = reply.send(cart.snapshot());
        }
    }
}

/// Appends one `ShipmentAttemptFailed` per failed attempt while the cart
/// itself is busy answering queries.
struct EventJournal<'a, S: EventStore> {
    handler: &'a CommandHandler<S, Cart>,
    instance_id: AggregateId,
    version: Version,
    recorded: Vec<CartEvent>,
}

#[async_trait]
impl<'a, S: EventStore> AttemptJournal for EventJournal<'a, S> {
    async fn attempt_failed(&mut self, attempt: u32, error: &EndpointError) -> Result<()> {
        let event = CartEvent::shipment_attempt_failed(
            attempt,
            error.is_retryable(),
            error.status(),
            error.to_string(),
        );
        self.version = self
            .handler
            .record(self.instance_id, self.version, std::slice::from_ref(&event))
            .await?;
        self.recorded.push(event);
        Ok(())
    }
}
