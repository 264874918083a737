//! Registry of cart controllers, one latest cart per user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::UserId;
use domain::{Cart, CartService, CartSnapshot, LifecycleSummary, LineItem};
use event_store::{EventEnvelope, EventStore};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::LifecycleConfig;
use crate::controller::CartController;
use crate::dispatcher::{CartHandle, CartSignal, ItemAccepted, Rejection, record_dropped_signal};
use crate::error::{LifecycleError, Result};
use crate::shipping::{ShipmentEndpoint, ShipmentOrchestrator};

/// Routes commands to per-cart controllers and owns their tasks.
///
/// The registry maps each user to their latest cart. A command for a user
/// without a cart provisions one; otherwise it goes to the latest instance,
/// even if that cart has already finished. Finished carts are answered from
/// the event log.
pub struct CartEngine<S: EventStore, E> {
    service: CartService<S>,
    orchestrator: Arc<ShipmentOrchestrator<E>>,
    config: LifecycleConfig,
    carts: RwLock<HashMap<UserId, CartHandle>>,
    /// Per-user gates that serialize provisioning without holding `carts`.
    opening: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
}

impl<S, E> CartEngine<S, E>
where
    S: EventStore + Clone + 'static,
    E: ShipmentEndpoint + 'static,
{
    pub fn new(store: S, endpoint: E, config: LifecycleConfig) -> Self {
        let orchestrator = ShipmentOrchestrator::new(endpoint, config.retry.clone());
        Self {
            service: CartService::new(store),
            orchestrator: Arc::new(orchestrator),
            config,
            carts: RwLock::new(HashMap::new()),
            opening: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            shutdown: watch::channel(false).0,
        }
    }

    pub fn service(&self) -> &CartService<S> {
        &self.service
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &E {
        self.orchestrator.endpoint()
    }

    /// Provisions a cart for `user_id`, or returns the live one.
    #[tracing::instrument(skip(self))]
    pub async fn open_cart(&self, user_id: UserId) -> Result<CartHandle> {
        self.ensure_accepting()?;

        let gate = {
            let mut opening = self.opening.lock().await;
            Arc::clone(opening.entry(user_id.clone()).or_default())
        };
        let result = {
            let _provisioning = gate.lock().await;
            self.provision(&user_id).await
        };

        let mut opening = self.opening.lock().await;
        // Only the map and this call still hold the gate.
        if Arc::strong_count(&gate) <= 2 {
            opening.remove(&user_id);
        }
        result
    }

    /// Opens a new cart unless a live one exists. The registry is locked
    /// only to look up and to insert, never across the append.
    async fn provision(&self, user_id: &UserId) -> Result<CartHandle> {
        if let Some(handle) = self.handle(user_id).await {
            if handle.is_running() && handle.summary().is_none() {
                return Ok(handle);
            }
        }

        let cart = self
            .service
            .open_cart(user_id.clone(), self.config.abandon_after)
            .await?;
        let handle = self.spawn(cart).await?;
        self.carts
            .write()
            .await
            .insert(user_id.clone(), handle.clone());
        Ok(handle)
    }

    pub async fn handle(&self, user_id: &UserId) -> Option<CartHandle> {
        self.carts.read().await.get(user_id).cloned()
    }

    /// Delivers a fire-and-forget signal.
    ///
    /// A signal the cart refuses is dropped by the controller. Errors here
    /// only come from provisioning a new cart.
    #[tracing::instrument(skip(self, signal), fields(signal = signal.kind()))]
    pub async fn signal(&self, user_id: &UserId, signal: CartSignal) -> Result<()> {
        let handle = self.route(user_id).await?;
        let kind = signal.kind();
        if let Err(err) = handle.signal(signal).await {
            record_dropped_signal(kind, handle.cart_id(), &err);
        }
        Ok(())
    }

    /// Adds an item behind validation and reports the result.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.item_id, quantity = item.quantity))]
    pub async fn add_item_validated(&self, user_id: &UserId, item: LineItem) -> Result<ItemAccepted> {
        let handle = self.route(user_id).await?;
        match handle.add_item_validated(item.clone()).await {
            Err(LifecycleError::Unavailable(reason)) => {
                // Nothing is listening any more; judge the command against
                // the recorded cart instead.
                let cart = self.load(&handle).await?;
                match cart.add_item_validated(item.clone()) {
                    Err(err) => Err(Rejection::from_cart_error(&err, &item, cart.state()).into()),
                    Ok(_) => Err(LifecycleError::Unavailable(reason)),
                }
            }
            other => other,
        }
    }

    pub async fn snapshot(&self, user_id: &UserId) -> Result<CartSnapshot> {
        let handle = self.existing(user_id).await?;
        match handle.snapshot().await {
            Err(LifecycleError::Unavailable(_)) => Ok(self.load(&handle).await?.snapshot()),
            other => other,
        }
    }

    /// The final summary of the user's latest cart, if it has finished.
    pub async fn summary(&self, user_id: &UserId) -> Result<Option<LifecycleSummary>> {
        let handle = self.existing(user_id).await?;
        if let Some(summary) = handle.summary() {
            return Ok(Some(summary));
        }
        if handle.is_running() {
            return Ok(None);
        }
        Ok(self.load(&handle).await?.summary())
    }

    /// Waits up to `timeout` for the latest cart to finish.
    pub async fn wait_for_summary(
        &self,
        user_id: &UserId,
        timeout: Duration,
    ) -> Result<Option<LifecycleSummary>> {
        let handle = self.existing(user_id).await?;
        Ok(handle.wait_for_summary(timeout).await)
    }

    pub async fn history(&self, user_id: &UserId) -> Result<Vec<EventEnvelope>> {
        let handle = self.existing(user_id).await?;
        Ok(self.service.history(handle.instance_id()).await?)
    }

    /// Number of carts whose controller is running.
    pub async fn active_carts(&self) -> usize {
        self.carts
            .read()
            .await
            .values()
            .filter(|handle| handle.is_running())
            .count()
    }

    /// Rebuilds the registry from the log and resumes every unfinished cart.
    ///
    /// Deadlines, shipment attempt counts and the wait for delivery all
    /// continue from what was recorded. Returns how many carts were resumed.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        self.ensure_accepting()?;

        let ids = self.service.cart_ids().await?;
        let mut carts = self.carts.write().await;
        let mut resumed = 0;

        for id in ids {
            if carts.values().any(|handle| handle.instance_id() == id) {
                continue;
            }
            let Some(cart) = self.service.load(id).await? else {
                continue;
            };
            let Some(user_id) = cart.user_id().cloned() else {
                continue;
            };

            let handle = if cart.is_terminal() {
                CartHandle::finished(&cart, user_id.clone(), id)
            } else {
                tracing::info!(cart_id = cart.cart_id(), state = %cart.state(), "resuming cart");
                resumed += 1;
                self.spawn(cart).await?
            };
            // Streams come oldest first, so the latest instance wins.
            carts.insert(user_id, handle);
        }

        tracing::info!(resumed, users = carts.len(), "cart registry recovered");
        Ok(resumed)
    }

    /// Stops every controller and waits for them.
    ///
    /// Waiting carts stop without writing anything; a shipment attempt in
    /// flight completes and is recorded first.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "cart controller task failed");
            }
        }
        tracing::info!("cart engine stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn route(&self, user_id: &UserId) -> Result<CartHandle> {
        match self.handle(user_id).await {
            Some(handle) => Ok(handle),
            None => self.open_cart(user_id.clone()).await,
        }
    }

    async fn existing(&self, user_id: &UserId) -> Result<CartHandle> {
        self.handle(user_id)
            .await
            .ok_or_else(|| LifecycleError::CartNotFound(user_id.clone()))
    }

    async fn load(&self, handle: &CartHandle) -> Result<Cart> {
        self.service
            .load(handle.instance_id())
            .await?
            .ok_or_else(|| LifecycleError::CartNotFound(handle.user_id().clone()))
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(LifecycleError::Unavailable(
                "engine is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    async fn spawn(&self, cart: Cart) -> Result<CartHandle> {
        let (controller, handle) = CartController::new(
            cart,
            self.service.clone(),
            Arc::clone(&self.orchestrator),
            &self.config,
            self.shutdown.subscribe(),
        )?;

        let span = tracing::info_span!(
            "cart",
            cart_id = handle.cart_id(),
            user_id = %handle.user_id()
        );

        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(
            async move {
                metrics::gauge!("carts_active").increment(1.0);
                match controller.run().await {
                    Ok(exit) => tracing::debug!(?exit, "cart controller stopped"),
                    Err(err) => tracing::error!(error = %err, "cart controller failed"),
                }
                metrics::gauge!("carts_active").decrement(1.0);
            }
            .instrument(span),
        );

        Ok(handle)
    }
}
