//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use lifecycle::{DEFAULT_SHIPPING_ADDRESS, LifecycleConfig};

use crate::monitor::MonitorConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `DATABASE_URL`: Postgres event store; in-memory when unset
/// - `SHIPPING_API_URL`: carrier endpoint (default: the built-in simulator)
/// - `SHIPPING_ADDRESS`: address sent with every shipment
/// - `CART_ABANDON_AFTER_SECS`: abandonment window (default 1800)
/// - `DELIVERY_WAIT_SECS`: how long delivery confirmation waits for the summary (default 5)
/// - `WORKER_HEARTBEAT_SEC`, `WORKER_HEARTBEAT_TTL_SECS`: heartbeat period and staleness (5, 20)
/// - `ALERT_HISTORY_MAX`: alert ring buffer size (default 200)
/// - `MONITOR_INTERVAL_SECS`: collector period (default 10)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub shipping_api_url: String,
    pub shipping_address: String,
    pub cart_abandon_after: Duration,
    pub delivery_wait: Duration,
    pub worker_heartbeat_interval: Duration,
    pub worker_heartbeat_ttl: Duration,
    pub alert_history_max: usize,
    pub monitor_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let port = parsed(&lookup, "PORT", defaults.port);

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            shipping_api_url: lookup("SHIPPING_API_URL").unwrap_or_else(|| simulator_url(port)),
            shipping_address: lookup("SHIPPING_ADDRESS").unwrap_or(defaults.shipping_address),
            cart_abandon_after: seconds(&lookup, "CART_ABANDON_AFTER_SECS", defaults.cart_abandon_after),
            delivery_wait: seconds(&lookup, "DELIVERY_WAIT_SECS", defaults.delivery_wait),
            worker_heartbeat_interval: seconds(
                &lookup,
                "WORKER_HEARTBEAT_SEC",
                defaults.worker_heartbeat_interval,
            ),
            worker_heartbeat_ttl: seconds(
                &lookup,
                "WORKER_HEARTBEAT_TTL_SECS",
                defaults.worker_heartbeat_ttl,
            ),
            alert_history_max: parsed(&lookup, "ALERT_HISTORY_MAX", defaults.alert_history_max),
            monitor_interval: seconds(&lookup, "MONITOR_INTERVAL_SECS", defaults.monitor_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            abandon_after: self.cart_abandon_after,
            shipping_address: self.shipping_address.clone(),
            ..LifecycleConfig::default()
        }
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            heartbeat_ttl: self.worker_heartbeat_ttl,
            alert_history_max: self.alert_history_max,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            shipping_api_url: simulator_url(3000),
            shipping_address: DEFAULT_SHIPPING_ADDRESS.to_string(),
            cart_abandon_after: Duration::from_secs(30 * 60),
            delivery_wait: Duration::from_secs(5),
            worker_heartbeat_interval: Duration::from_secs(5),
            worker_heartbeat_ttl: Duration::from_secs(20),
            alert_history_max: 200,
            monitor_interval: Duration::from_secs(10),
        }
    }
}

fn simulator_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/shipments/dispatch")
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
