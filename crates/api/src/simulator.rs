//! Stand-in for the external carrier, served by the same binary.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::UserId;
use domain::ShipmentReceipt;
use lifecycle::{EndpointError, ShipmentEndpoint, ShipmentRequest};
use tokio::sync::Mutex;

/// Largest quantity the carrier accepts on one line.
pub const MAX_QUANTITY_PER_LINE: u32 = 10;

/// Simulated carrier.
///
/// - any line over [`MAX_QUANTITY_PER_LINE`] units is refused with 400
/// - the first request of each user fails with 503
/// - the next one is scheduled, and the user starts over
#[derive(Debug, Clone, Default)]
pub struct ShipmentSimulator {
    failed_once: Arc<Mutex<HashSet<UserId>>>,
}

impl ShipmentSimulator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShipmentEndpoint for ShipmentSimulator {
    async fn schedule(&self, request: &ShipmentRequest) -> Result<ShipmentReceipt, EndpointError> {
        if let Some((item_id, _)) = request
            .items
            .iter()
            .find(|(_, line)| line.quantity > MAX_QUANTITY_PER_LINE)
        {
            tracing::info!(user_id = %request.user_id, %item_id, "simulated carrier refused shipment");
            return Err(EndpointError::Status {
                status: 400,
                body: format!(
                    "quantity exceeds the per-shipment limit of {MAX_QUANTITY_PER_LINE} for {item_id}"
                ),
            });
        }

        let mut failed_once = self.failed_once.lock().await;
        if failed_once.insert(request.user_id.clone()) {
            tracing::info!(user_id = %request.user_id, "simulated carrier temporarily unavailable");
            return Err(EndpointError::Status {
                status: 503,
                body: "shipping service temporarily unavailable".to_string(),
            });
        }
        failed_once.remove(&request.user_id);

        Ok(ShipmentReceipt {
            status: "scheduled".to_string(),
            tracking_id: format!("TRK-{}-999", request.user_id),
            item_count: u32::try_from(request.items.len()).unwrap_or(u32::MAX),
        })
    }
}
