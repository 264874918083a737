//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::Config;
use api::monitor::WorkerHeartbeat;
use api::{AppState, DynShipmentEndpoint};
use chrono::Utc;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use lifecycle::HttpShipmentEndpoint;
use lifecycle::shipping::DEFAULT_REQUEST_TIMEOUT;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Task queue the engine reports its heartbeat under.
const TASK_QUEUE: &str = "cart-lifecycle";

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the event store
    match config.database_url.clone() {
        Some(url) => {
            tracing::info!("using PostgreSQL event store");
            let store = PostgresEventStore::connect(&url).await?;
            store.run_migrations().await?;
            serve(store, config, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, carts will not survive a restart");
            serve(InMemoryEventStore::new(), config, metrics_handle).await
        }
    }
}

async fn serve<S: EventStore + Clone + 'static>(
    store: S,
    config: Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    // 4. Build the engine and resume every unfinished cart
    let endpoint: DynShipmentEndpoint = Arc::new(HttpShipmentEndpoint::new(
        config.shipping_api_url.clone(),
        DEFAULT_REQUEST_TIMEOUT,
    )?);
    let state = api::create_state(store, endpoint, &config);
    let resumed = state.engine.recover().await?;
    tracing::info!(
        resumed,
        shipping_api_url = %config.shipping_api_url,
        address = %config.shipping_address,
        "cart engine ready"
    );

    // 5. Background monitor tasks
    let background = [
        spawn_heartbeat(state.clone(), &config),
        spawn_collector(state.clone(), &config),
    ];

    // 6. Start server
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. Stop the carts; waiting carts resume from the log on next start
    for task in background {
        task.abort();
    }
    state.engine.shutdown().await;

    tracing::info!("server shut down gracefully");
    Ok(())
}

fn spawn_heartbeat<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    config: &Config,
) -> JoinHandle<()> {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let worker_id = format!("{host}-{}", std::process::id());
    let period = config.worker_heartbeat_interval.max(MIN_PERIOD);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let heartbeat = WorkerHeartbeat {
                worker_id: worker_id.clone(),
                task_queue: TASK_QUEUE.to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            };
            state.monitor.heartbeat(heartbeat, Utc::now()).await;
        }
    })
}

fn spawn_collector<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    config: &Config,
) -> JoinHandle<()> {
    let period = config.monitor_interval.max(MIN_PERIOD);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let active = state.engine.active_carts().await;
            state
                .monitor
                .collect(active, !state.engine.is_shutting_down(), Utc::now())
                .await;
        }
    })
}
