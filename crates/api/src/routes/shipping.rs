//! Simulated carrier endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lifecycle::{EndpointError, ShipmentEndpoint, ShipmentRequest};

use crate::simulator::ShipmentSimulator;

/// POST /shipments/dispatch
#[tracing::instrument(skip_all, fields(user_id = %request.user_id, lines = request.items.len()))]
pub async fn dispatch(
    State(simulator): State<ShipmentSimulator>,
    Json(request): Json<ShipmentRequest>,
) -> Response {
    let (status, body) = match simulator.schedule(&request).await {
        Ok(receipt) => (StatusCode::OK, serde_json::json!(receipt)),
        Err(EndpointError::Status { status, body }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            serde_json::json!({ "error": body }),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": err.to_string() }),
        ),
    };

    metrics::counter!("simulated_shipments_total", "status" => status.as_u16().to_string())
        .increment(1);
    (status, Json(body)).into_response()
}
