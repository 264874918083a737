//! Commands accepted by a cart and the client handle that sends them.
//!
//! There are three command kinds with different contracts:
//! - [`CartSignal`]: fire-and-forget; a refused signal is dropped and logged
//! - validated add: the caller gets [`ItemAccepted`] or a [`Rejection`]
//! - snapshot query: read-only, valid at any time

use std::time::Duration;

use common::{AggregateId, UserId};
use domain::{
    Cart, CartError, CartEvent, CartSnapshot, CartState, ItemId, LifecycleSummary, LineItem,
    MAX_QUANTITY_PER_CALL, Money,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{LifecycleError, Result};

/// Mutation delivered without a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartSignal {
    AddItem(LineItem),
    RemoveItem(ItemId),
    AcceptTerms,
    MarkReadyToShip,
    Cancel { reason: String },
    ConfirmDelivery,
}

impl CartSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            CartSignal::AddItem(_) => "add_item",
            CartSignal::RemoveItem(_) => "remove_item",
            CartSignal::AcceptTerms => "accept_terms",
            CartSignal::MarkReadyToShip => "mark_ready_to_ship",
            CartSignal::Cancel { .. } => "cancel",
            CartSignal::ConfirmDelivery => "confirm_delivery",
        }
    }

    /// Runs the state gate and returns the events to record.
    pub fn decide(&self, cart: &Cart) -> std::result::Result<Vec<CartEvent>, CartError> {
        match self {
            CartSignal::AddItem(item) => cart.add_item(item.clone()),
            CartSignal::RemoveItem(item_id) => cart.remove_item(item_id),
            CartSignal::AcceptTerms => cart.accept_terms(),
            CartSignal::MarkReadyToShip => cart.mark_ready_to_ship(),
            CartSignal::Cancel { reason } => cart.cancel(reason.as_str()),
            CartSignal::ConfirmDelivery => cart.confirm_delivery(),
        }
    }
}

/// Logs and counts a signal the cart refused.
pub(crate) fn record_dropped_signal(
    kind: &'static str,
    cart_id: &str,
    reason: &dyn std::fmt::Display,
) {
    metrics::counter!("cart_signals_dropped_total", "signal" => kind).increment(1);
    tracing::warn!(cart_id, signal = kind, %reason, "signal dropped");
}

/// Successful answer to a validated add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemAccepted {
    pub message: String,
    pub item: LineItem,
    pub new_total: Money,
}

/// Structured refusal of a validated command. Nothing was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    #[error("{message}")]
    InvalidState { state: CartState, message: String },

    #[error("{message}")]
    StockInsufficient {
        item_id: ItemId,
        name: String,
        requested: u32,
        available: u32,
        message: String,
    },

    #[error("{message}")]
    InvalidItem { message: String },
}

impl Rejection {
    pub fn stock_insufficient(item: &LineItem) -> Self {
        Rejection::StockInsufficient {
            item_id: item.item_id.clone(),
            name: item.name.clone(),
            requested: item.quantity,
            available: MAX_QUANTITY_PER_CALL,
            message: format!(
                "insufficient stock for {}: at most {MAX_QUANTITY_PER_CALL} available",
                item.name
            ),
        }
    }

    pub fn invalid_state(state: CartState) -> Self {
        Rejection::InvalidState {
            state,
            message: format!("cart is {state}; items can only be added while OPEN"),
        }
    }

    /// Translates a refused `add_item_validated`.
    pub fn from_cart_error(error: &CartError, item: &LineItem, state: CartState) -> Self {
        match error {
            CartError::StockInsufficient { .. } => Rejection::stock_insufficient(item),
            CartError::InvalidQuantity { .. }
            | CartError::InvalidPrice { .. }
            | CartError::QuantityOverflow { .. } => {
                Rejection::InvalidItem {
                    message: error.to_string(),
                }
            }
            _ => Rejection::invalid_state(state),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Rejection::InvalidState { .. } => "INVALID_STATE",
            Rejection::StockInsufficient { .. } => "STOCK_INSUFFICIENT",
            Rejection::InvalidItem { .. } => "INVALID_ITEM",
        }
    }
}

/// Everything a cart's mailbox carries.
#[derive(Debug)]
pub enum CartCommand {
    Signal(CartSignal),
    AddItemValidated {
        item: LineItem,
        reply: oneshot::Sender<Result<ItemAccepted>>,
    },
    GetSnapshot {
        reply: oneshot::Sender<CartSnapshot>,
    },
}

/// Client side of one cart controller.
///
/// Cheap to clone. Once the controller has stopped every call reports
/// [`LifecycleError::Unavailable`], and the caller falls back to the log.
#[derive(Debug, Clone)]
pub struct CartHandle {
    user_id: UserId,
    instance_id: AggregateId,
    cart_id: String,
    sender: mpsc::Sender<CartCommand>,
    summary: watch::Receiver<Option<LifecycleSummary>>,
}

impl CartHandle {
    pub(crate) fn new(
        cart: &Cart,
        user_id: UserId,
        instance_id: AggregateId,
        sender: mpsc::Sender<CartCommand>,
        summary: watch::Receiver<Option<LifecycleSummary>>,
    ) -> Self {
        Self {
            user_id,
            instance_id,
            cart_id: cart.cart_id().to_string(),
            sender,
            summary,
        }
    }

    /// A handle for a cart whose lifecycle already ended; nothing listens.
    pub(crate) fn finished(cart: &Cart, user_id: UserId, instance_id: AggregateId) -> Self {
        let (sender, _) = mpsc::channel(1);
        let (_, summary) = watch::channel(cart.summary());
        Self::new(cart, user_id, instance_id, sender, summary)
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn instance_id(&self) -> AggregateId {
        self.instance_id
    }

    pub fn cart_id(&self) -> &str {
        &self.cart_id
    }

    /// True while the controller task accepts commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Enqueues a signal. Fails only when the controller has stopped.
    pub async fn signal(&self, signal: CartSignal) -> Result<()> {
        self.sender
            .send(CartCommand::Signal(signal))
            .await
            .map_err(|_| self.unavailable())
    }

    pub async fn add_item_validated(&self, item: LineItem) -> Result<ItemAccepted> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(CartCommand::AddItemValidated { item, reply })
            .await
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())?
    }

    pub async fn snapshot(&self) -> Result<CartSnapshot> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(CartCommand::GetSnapshot { reply })
            .await
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    /// The final summary, once the lifecycle has ended.
    pub fn summary(&self) -> Option<LifecycleSummary> {
        self.summary.borrow().clone()
    }

    /// Waits up to `timeout` for the lifecycle to end.
    pub async fn wait_for_summary(&self, timeout: Duration) -> Option<LifecycleSummary> {
        let mut summary = self.summary.clone();
        let finished = tokio::time::timeout(timeout, summary.wait_for(Option::is_some)).await;
        match finished {
            Ok(Ok(value)) => value.clone(),
            // The controller stopped without finishing, or time ran out.
            _ => self.summary(),
        }
    }

    fn unavailable(&self) -> LifecycleError {
        LifecycleError::Unavailable(format!("cart {} is not running", self.cart_id))
    }
}
