//! Engine configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Address used when the caller does not configure one.
pub const DEFAULT_SHIPPING_ADDRESS: &str = "Default address";

/// Settings shared by every cart controller of an engine.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a cart may stay open before it is abandoned.
    pub abandon_after: Duration,
    pub retry: RetryPolicy,
    pub mailbox_capacity: usize,
    pub shipping_address: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            abandon_after: Duration::from_secs(30 * 60),
            retry: RetryPolicy::default(),
            mailbox_capacity: 64,
            shipping_address: DEFAULT_SHIPPING_ADDRESS.to_string(),
        }
    }
}
