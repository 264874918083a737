//! Health check endpoints backed by the monitor.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitor::{ComponentStatus, ENGINE_COMPONENT, HealthMonitor, MonitorSnapshot, Status};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: Status,
    pub components: BTreeMap<String, ComponentStatus>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct ProbeResponse {
    pub status: &'static str,
}

/// GET /health: overall status and every component.
pub async fn check(State(monitor): State<Arc<HealthMonitor>>) -> Json<HealthResponse> {
    let snapshot = monitor.snapshot(Utc::now()).await;
    Json(HealthResponse {
        status: snapshot.overall,
        components: snapshot.components,
        last_run_at: snapshot.last_run_at,
    })
}

/// GET /health/live
pub async fn live() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "ok" })
}

/// GET /health/ready: 503 until the engine reports ok.
pub async fn ready(State(monitor): State<Arc<HealthMonitor>>) -> (StatusCode, Json<ProbeResponse>) {
    let engine = monitor.component(ENGINE_COMPONENT).await;
    match engine.map(|component| component.status) {
        Some(Status::Ok) => (StatusCode::OK, Json(ProbeResponse { status: "ready" })),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse { status: "not_ready" }),
        ),
    }
}

/// GET /health/monitor: full snapshot including workers and recent alerts.
pub async fn monitor(State(monitor): State<Arc<HealthMonitor>>) -> Json<MonitorSnapshot> {
    Json(monitor.snapshot(Utc::now()).await)
}
