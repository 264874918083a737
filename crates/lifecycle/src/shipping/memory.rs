//! Scripted in-memory shipment endpoint for testing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::ShipmentReceipt;
use tokio::sync::Mutex;

use super::endpoint::{EndpointError, ShipmentEndpoint, ShipmentRequest};

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<Result<ShipmentReceipt, EndpointError>>,
    requests: Vec<ShipmentRequest>,
}

/// Answers from a queue of scripted responses, then succeeds.
///
/// Once the script runs out every call returns a `scheduled` receipt with
/// tracking id `TRK-{user_id}-999`. Clones share the script and call log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShipmentEndpoint {
    state: Arc<Mutex<ScriptState>>,
    latency: Duration,
}

impl InMemoryShipmentEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call takes `latency` before it answers.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn push_response(&self, response: Result<ShipmentReceipt, EndpointError>) {
        self.state.lock().await.responses.push_back(response);
    }

    /// Queues `count` failures with the given HTTP status.
    pub async fn fail_with_status(&self, status: u16, count: usize) {
        let mut state = self.state.lock().await;
        for _ in 0..count {
            state.responses.push_back(Err(EndpointError::Status {
                status,
                body: format!("status {status}"),
            }));
        }
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    pub async fn requests(&self) -> Vec<ShipmentRequest> {
        self.state.lock().await.requests.clone()
    }

    pub fn receipt_for(request: &ShipmentRequest) -> ShipmentReceipt {
        ShipmentReceipt {
            status: "scheduled".to_string(),
            tracking_id: format!("TRK-{}-999", request.user_id),
            item_count: u32::try_from(request.items.len()).unwrap_or(u32::MAX),
        }
    }
}

#[async_trait]
impl ShipmentEndpoint for InMemoryShipmentEndpoint {
    async fn schedule(&self, request: &ShipmentRequest) -> Result<ShipmentReceipt, EndpointError> {
        let scripted = {
            let mut state = self.state.lock().await;
            state.requests.push(request.clone());
            state.responses.pop_front()
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        scripted.unwrap_or_else(|| Ok(Self::receipt_for(request)))
    }
}
