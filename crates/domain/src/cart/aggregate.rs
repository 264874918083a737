//! Cart aggregate implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    CartError, CartEvent, CartSnapshot, CartState, ItemId, LifecycleOutcome, LifecycleSummary,
    LineItem, Money, ShipmentFailureKind, ShipmentReceipt, ShipmentResult,
    events::{CartOpenedData, ShipmentAttemptFailedData, ShipmentFailedData},
};

/// Most units a single validated add may request.
pub const MAX_QUANTITY_PER_CALL: u32 = 5;

/// Cart aggregate root: one user's cart from opening to a terminal outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    id: Option<AggregateId>,
    version: Version,
    cart_id: String,
    user_id: Option<UserId>,
    state: CartState,
    terms_accepted: bool,
    items: BTreeMap<ItemId, LineItem>,
    /// Kept equal to the sum of line subtotals by `recompute_total`.
    total: Money,
    opened_at: Option<DateTime<Utc>>,
    abandon_at: Option<DateTime<Utc>>,
    shipment_attempts: u32,
    last_shipment_error: Option<String>,
    last_shipment_status: Option<u16>,
    shipment_result: Option<ShipmentResult>,
    outcome: Option<LifecycleOutcome>,
}

impl Aggregate for Cart {
    type Event = CartEvent;
    type Error = CartError;

    fn aggregate_type() -> &'static str {
        "Cart"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CartEvent::CartOpened(data) => self.apply_opened(data),
            CartEvent::ItemAdded(data) => self.apply_add_item(data.into(), true),
            CartEvent::ItemRemoved(data) => self.apply_remove_item(&data.item_id),
            CartEvent::TermsAccepted(_) => self.terms_accepted = true,
            CartEvent::CheckoutCompleted(_) => self.state = CartState::Paid,
            CartEvent::CartCancelled(_) => {
                self.state = CartState::Cancelled;
                self.outcome = Some(LifecycleOutcome::CancelledByUser);
            }
            CartEvent::CartAbandoned(_) => {
                self.state = CartState::Abandoned;
                self.outcome = Some(LifecycleOutcome::AbandonedTimeout);
            }
            CartEvent::ShipmentAttemptFailed(data) => self.apply_attempt_failed(data),
            CartEvent::ShipmentScheduled(data) => {
                self.state = CartState::Shipped;
                self.shipment_result = Some(ShipmentResult::Scheduled(data.receipt));
            }
            CartEvent::ShipmentFailed(data) => self.apply_shipment_failed(data),
            CartEvent::DeliveryConfirmed(_) => {
                self.state = CartState::Delivered;
                self.outcome = Some(LifecycleOutcome::CompletedDelivered);
            }
        }
    }
}

// Query methods
impl Cart {
    /// Public key, `cart-{user}-{instance}`.
    pub fn cart_id(&self) -> &str {
        &self.cart_id
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn state(&self) -> CartState {
        self.state
    }

    pub fn terms_accepted(&self) -> bool {
        self.terms_accepted
    }

    pub fn items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.values()
    }

    pub fn get_item(&self, item_id: &ItemId) -> Option<&LineItem> {
        self.items.get(item_id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Absolute abandonment deadline recorded when the cart was opened.
    pub fn abandon_at(&self) -> Option<DateTime<Utc>> {
        self.abandon_at
    }

    /// Failed shipment attempts recorded so far.
    pub fn shipment_attempts(&self) -> u32 {
        self.shipment_attempts
    }

    pub fn last_shipment_error(&self) -> Option<&str> {
        self.last_shipment_error.as_deref()
    }

    /// HTTP status of the last failed attempt, if the carrier answered.
    pub fn last_shipment_status(&self) -> Option<u16> {
        self.last_shipment_status
    }

    pub fn shipment_result(&self) -> Option<&ShipmentResult> {
        self.shipment_result.as_ref()
    }

    pub fn outcome(&self) -> Option<LifecycleOutcome> {
        self.outcome
    }

    /// True once a terminal branch was taken; only queries remain valid.
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            items: self
                .items
                .iter()
                .map(|(id, line)| (id.clone(), line.into()))
                .collect(),
            total: self.total,
            state: self.state,
            terms_accepted: self.terms_accepted,
        }
    }

    /// The frozen summary, available once the lifecycle has ended.
    pub fn summary(&self) -> Option<LifecycleSummary> {
        let outcome = self.outcome?;
        let snapshot = self.snapshot();
        Some(LifecycleSummary {
            cart_id: self.cart_id.clone(),
            user_id: self.user_id.clone()?,
            terms_accepted: snapshot.terms_accepted,
            items: snapshot.items,
            total: snapshot.total,
            shipment_result: self.shipment_result.clone(),
            state: snapshot.state,
            lifecycle_outcome: outcome,
        })
    }
}

// Command methods (return events)
impl Cart {
    /// Opens a fresh cart instance for `user_id`.
    pub fn open(
        &self,
        instance_id: AggregateId,
        user_id: UserId,
        opened_at: DateTime<Utc>,
        abandon_at: DateTime<Utc>,
    ) -> Result<Vec<CartEvent>, CartError> {
        if self.id.is_some() {
            return Err(CartError::AlreadyOpened);
        }

        Ok(vec![CartEvent::cart_opened(
            instance_id,
            user_id,
            opened_at,
            abandon_at,
        )])
    }

    /// Adds units of an item, merging into an existing line.
    pub fn add_item(&self, item: LineItem) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_modify_items(), "add item")?;

        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity {
                quantity: item.quantity,
            });
        }

        if item.unit_price.is_negative() {
            return Err(CartError::InvalidPrice {
                price: item.unit_price.cents(),
            });
        }

        if let Some(existing) = self.items.get(&item.item_id) {
            if existing.quantity.checked_add(item.quantity).is_none() {
                return Err(CartError::QuantityOverflow {
                    item_id: item.item_id,
                    existing: existing.quantity,
                    added: item.quantity,
                });
            }
        }

        Ok(vec![CartEvent::item_added(&item)])
    }

    /// `add_item` behind the stock ceiling. Every check runs before any
    /// event is produced, so a rejection leaves the cart untouched.
    pub fn add_item_validated(&self, item: LineItem) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_modify_items(), "add item")?;

        if item.quantity > MAX_QUANTITY_PER_CALL {
            return Err(CartError::StockInsufficient {
                name: item.name,
                requested: item.quantity,
                available: MAX_QUANTITY_PER_CALL,
            });
        }

        self.add_item(item)
    }

    /// Removing an item that is not in the cart records nothing.
    pub fn remove_item(&self, item_id: &ItemId) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_modify_items(), "remove item")?;

        if !self.items.contains_key(item_id) {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::item_removed(item_id.clone())])
    }

    pub fn accept_terms(&self) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_accept_terms(), "accept terms")?;

        if self.terms_accepted {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::terms_accepted()])
    }

    /// Completes checkout. Requires accepted terms.
    pub fn mark_ready_to_ship(&self) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_checkout(), "check out")?;

        if !self.terms_accepted {
            return Err(CartError::TermsNotAccepted);
        }

        Ok(vec![CartEvent::checkout_completed(self.total)])
    }

    pub fn cancel(&self, reason: impl Into<String>) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_cancel(), "cancel")?;
        Ok(vec![CartEvent::cart_cancelled(reason)])
    }

    /// Closes an open cart whose deadline has passed.
    pub fn abandon(&self) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_abandon(), "abandon")?;
        let deadline = self.abandon_at.unwrap_or_else(Utc::now);
        Ok(vec![CartEvent::cart_abandoned(deadline)])
    }

    pub fn record_shipment_attempt_failure(
        &self,
        attempt: u32,
        retryable: bool,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Result<Vec<CartEvent>, CartError> {
        self.require_pending_shipment("record shipment attempt")?;
        Ok(vec![CartEvent::shipment_attempt_failed(
            attempt, retryable, status, error,
        )])
    }

    pub fn record_shipment_scheduled(
        &self,
        receipt: ShipmentReceipt,
        attempt: u32,
    ) -> Result<Vec<CartEvent>, CartError> {
        self.require_pending_shipment("record shipment")?;
        Ok(vec![CartEvent::shipment_scheduled(receipt, attempt)])
    }

    pub fn record_shipment_failure(
        &self,
        kind: ShipmentFailureKind,
        error: impl Into<String>,
        attempts: u32,
        status: Option<u16>,
    ) -> Result<Vec<CartEvent>, CartError> {
        self.require_pending_shipment("record shipment failure")?;
        Ok(vec![CartEvent::shipment_failed(
            kind, error, attempts, status,
        )])
    }

    pub fn confirm_delivery(&self) -> Result<Vec<CartEvent>, CartError> {
        self.require(self.state.can_confirm_delivery(), "confirm delivery")?;
        Ok(vec![CartEvent::delivery_confirmed()])
    }

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), CartError> {
        if self.id.is_none() {
            return Err(CartError::NotOpened);
        }
        if !allowed {
            return Err(CartError::InvalidStateTransition {
                current_state: self.state,
                action,
            });
        }
        Ok(())
    }

    fn require_pending_shipment(&self, action: &'static str) -> Result<(), CartError> {
        self.require(self.state.awaits_shipment(), action)?;
        if self.shipment_result.is_some() {
            return Err(CartError::ShipmentAlreadyRecorded);
        }
        Ok(())
    }
}

// Entity mutators. Callers apply each logical event once; nothing here
// deduplicates.
impl Cart {
    /// Puts a line into the cart.
    ///
    /// With `allow_overwrite_merge` an existing line keeps its name and price
    /// and grows by `item.quantity`; without it the line is replaced.
    pub fn apply_add_item(&mut self, item: LineItem, allow_overwrite_merge: bool) {
        match self.items.get_mut(&item.item_id) {
            Some(existing) if allow_overwrite_merge => {
                existing.quantity = existing.quantity.saturating_add(item.quantity);
            }
            _ => {
                self.items.insert(item.item_id.clone(), item);
            }
        }
        self.recompute_total();
    }

    pub fn apply_remove_item(&mut self, item_id: &ItemId) {
        if self.items.remove(item_id).is_some() {
            self.recompute_total();
        }
    }

    pub fn recompute_total(&mut self) {
        self.total = self.items.values().map(LineItem::subtotal).sum();
    }

    fn apply_opened(&mut self, data: CartOpenedData) {
        self.id = Some(data.instance_id);
        self.cart_id = data.cart_id;
        self.user_id = Some(data.user_id);
        self.opened_at = Some(data.opened_at);
        self.abandon_at = Some(data.abandon_at);
        self.state = CartState::Open;
    }

    fn apply_attempt_failed(&mut self, data: ShipmentAttemptFailedData) {
        self.shipment_attempts = self.shipment_attempts.max(data.attempt);
        self.last_shipment_error = Some(data.error);
        self.last_shipment_status = data.status;
    }

    fn apply_shipment_failed(&mut self, data: ShipmentFailedData) {
        self.shipment_attempts = self.shipment_attempts.max(data.attempts);
        self.shipment_result = Some(ShipmentResult::Failed {
            kind: data.kind,
            error: data.error,
            attempts: data.attempts,
            status: data.status,
        });
        self.outcome = Some(LifecycleOutcome::ShipmentFailed);
    }
}
