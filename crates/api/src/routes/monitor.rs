//! Heartbeat ingestion, alert history, live events and metrics exposition.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::monitor::{Alert, HealthMonitor, WorkerHeartbeat};

/// Period between two snapshots on `/events`.
const EVENT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Serialize)]
pub struct AlertHistory {
    pub alerts: Vec<Alert>,
}

/// POST /workers/heartbeat
#[tracing::instrument(skip(monitor))]
pub async fn heartbeat(
    State(monitor): State<Arc<HealthMonitor>>,
    Json(heartbeat): Json<WorkerHeartbeat>,
) -> Json<serde_json::Value> {
    monitor.heartbeat(heartbeat, Utc::now()).await;
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /alerts/history
pub async fn alerts(State(monitor): State<Arc<HealthMonitor>>) -> Json<AlertHistory> {
    Json(AlertHistory {
        alerts: monitor.alerts().await,
    })
}

/// GET /events: monitor snapshots as server-sent events.
pub async fn events(
    State(monitor): State<Arc<HealthMonitor>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let snapshots = stream::unfold((monitor, true), |(monitor, first)| async move {
        if !first {
            tokio::time::sleep(EVENT_INTERVAL).await;
        }
        let snapshot = monitor.snapshot(Utc::now()).await;
        let event = Event::default()
            .json_data(&snapshot)
            .unwrap_or_else(|err| Event::default().comment(format!("snapshot unavailable: {err}")));
        Some((Ok(event), (monitor, false)))
    });

    Sse::new(snapshots).keep_alive(KeepAlive::default())
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
