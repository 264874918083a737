//! Shipment endpoint contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::UserId;
use domain::{CartSnapshot, ItemId, Money, ShipmentReceipt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One line of a shipment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLine {
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

/// Body sent to the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub user_id: UserId,
    pub items: BTreeMap<ItemId, ShipmentLine>,
    pub address: String,
}

impl ShipmentRequest {
    pub fn from_snapshot(user_id: UserId, snapshot: &CartSnapshot, address: impl Into<String>) -> Self {
        let items = snapshot
            .items
            .iter()
            .map(|(id, line)| {
                (
                    id.clone(),
                    ShipmentLine {
                        name: line.name.clone(),
                        unit_price: line.unit_price,
                        quantity: line.quantity,
                    },
                )
            })
            .collect();

        Self {
            user_id,
            items,
            address: address.into(),
        }
    }
}

/// Why a single shipment call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("shipment call timed out")]
    Timeout,

    /// The carrier answered with a non-success status.
    #[error("shipment endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A success status whose body could not be understood.
    #[error("invalid shipment response: {0}")]
    InvalidResponse(String),
}

impl EndpointError {
    /// Only a 4xx answer is final; everything else may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EndpointError::Status { status, .. } if (400..500).contains(status))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            EndpointError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The external carrier that books shipments.
#[async_trait]
pub trait ShipmentEndpoint: Send + Sync {
    async fn schedule(&self, request: &ShipmentRequest) -> Result<ShipmentReceipt, EndpointError>;
}

#[async_trait]
impl<T: ShipmentEndpoint + ?Sized> ShipmentEndpoint for std::sync::Arc<T> {
    async fn schedule(&self, request: &ShipmentRequest) -> Result<ShipmentReceipt, EndpointError> {
        (**self).schedule(request).await
    }
}
