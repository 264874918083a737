//! Cart state machine.

use serde::{Deserialize, Serialize};

/// Where a cart is in its lifecycle.
///
/// State transitions:
/// ```text
/// Open ──► Paid ──► Shipped ──► Delivered
///   │        │
///   │        └──► (shipment failed: stays Paid, lifecycle ends)
///   ├──► Cancelled
///   └──► Abandoned (deadline elapsed)
/// ```
/// Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartState {
    /// Items and terms may change.
    #[default]
    Open,

    /// Checked out; shipment is being arranged.
    Paid,

    /// The carrier scheduled the shipment; waiting for delivery.
    Shipped,

    Delivered,

    Cancelled,

    /// The purchase window closed before checkout.
    Abandoned,
}

impl CartState {
    pub fn can_modify_items(&self) -> bool {
        matches!(self, CartState::Open)
    }

    pub fn can_accept_terms(&self) -> bool {
        matches!(self, CartState::Open)
    }

    /// Checkout additionally requires accepted terms, which is not a state.
    pub fn can_checkout(&self) -> bool {
        matches!(self, CartState::Open)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, CartState::Open)
    }

    pub fn can_abandon(&self) -> bool {
        matches!(self, CartState::Open)
    }

    pub fn awaits_shipment(&self) -> bool {
        matches!(self, CartState::Paid)
    }

    pub fn can_confirm_delivery(&self) -> bool {
        matches!(self, CartState::Shipped)
    }

    /// True for states no transition leaves.
    ///
    /// A failed shipment also ends the lifecycle while the state stays
    /// `Paid`; see [`LifecycleOutcome`].
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CartState::Delivered | CartState::Cancelled | CartState::Abandoned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CartState::Open => "OPEN",
            CartState::Paid => "PAID",
            CartState::Shipped => "SHIPPED",
            CartState::Delivered => "DELIVERED",
            CartState::Cancelled => "CANCELLED",
            CartState::Abandoned => "ABANDONED",
        }
    }
}

impl std::fmt::Display for CartState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal branch a cart's lifecycle ended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleOutcome {
    AbandonedTimeout,
    CancelledByUser,
    ShipmentFailed,
    CompletedDelivered,
}

impl LifecycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::AbandonedTimeout => "ABANDONED_TIMEOUT",
            LifecycleOutcome::CancelledByUser => "CANCELLED_BY_USER",
            LifecycleOutcome::ShipmentFailed => "SHIPMENT_FAILED",
            LifecycleOutcome::CompletedDelivered => "COMPLETED_DELIVERED",
        }
    }
}

impl std::fmt::Display for LifecycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CartState; 6] = [
        CartState::Open,
        CartState::Paid,
        CartState::Shipped,
        CartState::Delivered,
        CartState::Cancelled,
        CartState::Abandoned,
    ];

    #[test]
    fn default_state_is_open() {
        assert_eq!(CartState::default(), CartState::Open);
    }

    #[test]
    fn only_open_accepts_cart_edits() {
        for state in ALL {
            let open = state == CartState::Open;
            assert_eq!(state.can_modify_items(), open, "{state}");
            assert_eq!(state.can_accept_terms(), open, "{state}");
            assert_eq!(state.can_checkout(), open, "{state}");
            assert_eq!(state.can_cancel(), open, "{state}");
            assert_eq!(state.can_abandon(), open, "{state}");
        }
    }

    #[test]
    fn only_shipped_accepts_delivery() {
        for state in ALL {
            assert_eq!(
                state.can_confirm_delivery(),
                state == CartState::Shipped,
                "{state}"
            );
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!CartState::Open.is_terminal());
        assert!(!CartState::Paid.is_terminal());
        assert!(!CartState::Shipped.is_terminal());
        assert!(CartState::Delivered.is_terminal());
        assert!(CartState::Cancelled.is_terminal());
        assert!(CartState::Abandoned.is_terminal());
    }

    #[test]
    fn wire_names_are_screaming_case() {
        assert_eq!(serde_json::to_string(&CartState::Paid).unwrap(), "\"PAID\"");
        assert_eq!(
            serde_json::to_string(&LifecycleOutcome::AbandonedTimeout).unwrap(),
            "\"ABANDONED_TIMEOUT\""
        );
        let outcome: LifecycleOutcome = serde_json::from_str("\"COMPLETED_DELIVERED\"").unwrap();
        assert_eq!(outcome, LifecycleOutcome::CompletedDelivered);
    }

    #[test]
    fn display_matches_wire_name() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json.trim_matches('"'), state.to_string());
        }
    }
}
