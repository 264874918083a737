//! Cart command ingress.
//!
//! Fire-and-forget commands answer 202 as soon as they are queued; a cart
//! that refuses one drops it. Validated adds answer with the outcome.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::UserId;
use domain::{CartSnapshot, ItemId, LifecycleSummary, LineItem, Money};
use event_store::{EventEnvelope, EventStore};
use lifecycle::{CartSignal, ItemAccepted};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct OpenCartRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub item_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

impl AddItemRequest {
    fn into_line_item(self) -> Result<LineItem, ApiError> {
        if self.item_id.trim().is_empty() {
            return Err(ApiError::BadRequest("item_id must not be empty".to_string()));
        }
        Ok(LineItem::new(
            self.item_id,
            self.name,
            Money::from_cents(self.unit_price_cents),
            self.quantity,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartOpenedResponse {
    pub cart_id: String,
    pub user_id: UserId,
    pub state: domain::CartState,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: UserId,
    pub cart_id: String,
    pub running: bool,
    #[serde(flatten)]
    pub snapshot: CartSnapshot,
}

#[derive(Serialize)]
pub struct SignalAccepted {
    pub status: &'static str,
    pub signal: &'static str,
    pub user_id: UserId,
}

#[derive(Serialize)]
pub struct DeliveryResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<LifecycleSummary>,
}

fn user(raw: String) -> Result<UserId, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }
    Ok(UserId::new(raw))
}

async fn send<S: EventStore + Clone + 'static>(
    state: &AppState<S>,
    user_id: UserId,
    signal: CartSignal,
) -> Result<(StatusCode, Json<SignalAccepted>), ApiError> {
    let kind = signal.kind();
    state.engine.signal(&user_id, signal).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SignalAccepted {
            status: "accepted",
            signal: kind,
            user_id,
        }),
    ))
}

// -- Handlers --

/// POST /carts: open a cart, or return the live one.
#[tracing::instrument(skip(state, req))]
pub async fn open<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<OpenCartRequest>,
) -> Result<(StatusCode, Json<CartOpenedResponse>), ApiError> {
    let user_id = user(req.user_id)?;
    let handle = state.engine.open_cart(user_id.clone()).await?;
    let snapshot = handle.snapshot().await?;

    Ok((
        StatusCode::CREATED,
        Json(CartOpenedResponse {
            cart_id: handle.cart_id().to_string(),
            user_id,
            state: snapshot.state,
        }),
    ))
}

/// GET /carts/{user_id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let user_id = user(user_id)?;
    let snapshot = state.engine.snapshot(&user_id).await?;
    let handle = state.engine.handle(&user_id).await;

    Ok(Json(CartResponse {
        cart_id: handle
            .as_ref()
            .map(|handle| handle.cart_id().to_string())
            .unwrap_or_default(),
        running: handle.is_some_and(|handle| handle.is_running()),
        user_id,
        snapshot,
    }))
}

/// GET /carts/{user_id}/events: raw log of the latest cart.
#[tracing::instrument(skip(state))]
pub async fn events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<EventEnvelope>>, ApiError> {
    let user_id = user(user_id)?;
    Ok(Json(state.engine.history(&user_id).await?))
}

/// POST /carts/{user_id}/items: validated add.
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<ItemAccepted>, ApiError> {
    let user_id = user(user_id)?;
    let item = req.into_line_item()?;
    Ok(Json(state.engine.add_item_validated(&user_id, item).await?))
}

/// POST /carts/{user_id}/items/signal: fire-and-forget add.
#[tracing::instrument(skip(state, req))]
pub async fn add_item_signal<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<SignalAccepted>), ApiError> {
    let user_id = user(user_id)?;
    let item = req.into_line_item()?;
    send(&state, user_id, CartSignal::AddItem(item)).await
}

/// DELETE /carts/{user_id}/items/{item_id}
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((user_id, item_id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<SignalAccepted>), ApiError> {
    let user_id = user(user_id)?;
    send(&state, user_id, CartSignal::RemoveItem(ItemId::new(item_id))).await
}

/// POST /carts/{user_id}/terms
#[tracing::instrument(skip(state))]
pub async fn accept_terms<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<SignalAccepted>), ApiError> {
    send(&state, user(user_id)?, CartSignal::AcceptTerms).await
}

/// POST /carts/{user_id}/checkout
#[tracing::instrument(skip(state))]
pub async fn checkout<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<SignalAccepted>), ApiError> {
    send(&state, user(user_id)?, CartSignal::MarkReadyToShip).await
}

/// POST /carts/{user_id}/cancel: the body and its reason are optional.
#[tracing::instrument(skip(state, body))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<SignalAccepted>), ApiError> {
    let request = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice::<CancelRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid cancel request: {e}")))?
    };
    let reason = request
        .reason
        .unwrap_or_else(|| "cancelled by user".to_string());

    send(&state, user(user_id)?, CartSignal::Cancel { reason }).await
}

/// POST /carts/{user_id}/delivery: confirm delivery and wait for the summary.
#[tracing::instrument(skip(state))]
pub async fn confirm_delivery<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<DeliveryResponse>), ApiError> {
    let user_id = user(user_id)?;
    state
        .engine
        .signal(&user_id, CartSignal::ConfirmDelivery)
        .await?;

    let summary = state
        .engine
        .wait_for_summary(&user_id, state.delivery_wait)
        .await?;

    Ok(match summary {
        Some(summary) => (
            StatusCode::OK,
            Json(DeliveryResponse {
                status: "completed",
                summary: Some(summary),
            }),
        ),
        None => (
            StatusCode::ACCEPTED,
            Json(DeliveryResponse {
                status: "pending",
                summary: None,
            }),
        ),
    })
}
