//! HTTP front of the cart lifecycle engine.
//!
//! Serves the cart command ingress, a simulated carrier endpoint and the
//! health monitor, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod monitor;
pub mod routes;
pub mod simulator;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post};
use event_store::EventStore;
use lifecycle::{CartEngine, ShipmentEndpoint};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use monitor::HealthMonitor;
use simulator::ShipmentSimulator;

/// Shipment endpoint chosen at startup.
pub type DynShipmentEndpoint = Arc<dyn ShipmentEndpoint>;

pub type Engine<S> = CartEngine<S, DynShipmentEndpoint>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub engine: Arc<Engine<S>>,
    pub monitor: Arc<HealthMonitor>,
    pub simulator: ShipmentSimulator,
    /// How long delivery confirmation waits for the final summary.
    pub delivery_wait: Duration,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::monitor::metrics))
        .with_state(metrics_handle);

    let monitor_router = Router::new()
        .route("/health", get(routes::health::check))
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .route("/health/monitor", get(routes::health::monitor))
        .route("/workers/heartbeat", post(routes::monitor::heartbeat))
        .route("/alerts/history", get(routes::monitor::alerts))
        .route("/events", get(routes::monitor::events))
        .with_state(state.monitor.clone());

    let shipping_router = Router::new()
        .route("/shipments/dispatch", post(routes::shipping::dispatch))
        .with_state(state.simulator.clone());

    Router::new()
        .route("/carts", post(routes::carts::open::<S>))
        .route("/carts/{user_id}", get(routes::carts::get::<S>))
        .route("/carts/{user_id}/events", get(routes::carts::events::<S>))
        .route("/carts/{user_id}/items", post(routes::carts::add_item::<S>))
        .route(
            "/carts/{user_id}/items/signal",
            post(routes::carts::add_item_signal::<S>),
        )
        .route(
            "/carts/{user_id}/items/{item_id}",
            delete(routes::carts::remove_item::<S>),
        )
        .route("/carts/{user_id}/terms", post(routes::carts::accept_terms::<S>))
        .route("/carts/{user_id}/checkout", post(routes::carts::checkout::<S>))
        .route("/carts/{user_id}/cancel", post(routes::carts::cancel::<S>))
        .route(
            "/carts/{user_id}/delivery",
            post(routes::carts::confirm_delivery::<S>),
        )
        .with_state(state)
        .merge(monitor_router)
        .merge(shipping_router)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the application state over `event_store`.
pub fn create_state<S: EventStore + Clone + 'static>(
    event_store: S,
    endpoint: DynShipmentEndpoint,
    config: &config::Config,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        engine: Arc::new(CartEngine::new(event_store, endpoint, config.lifecycle())),
        monitor: Arc::new(HealthMonitor::new(config.monitor())),
        simulator: ShipmentSimulator::new(),
        delivery_wait: config.delivery_wait,
    })
}
