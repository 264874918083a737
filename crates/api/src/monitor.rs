//! Health monitor: component statuses, worker heartbeats and alert history.
//!
//! The monitor is observational only. A background collector refreshes it
//! periodically; HTTP handlers read snapshots from it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub const ENGINE_COMPONENT: &str = "engine";
pub const WORKERS_COMPONENT: &str = "workers";

/// Alerts included in a snapshot.
const RECENT_ALERTS: usize = 10;

/// A worker silent for this many heartbeat TTLs is forgotten.
const WORKER_RETENTION_TTLS: i32 = 15;

/// Upper bound on tracked workers; the longest silent one makes room.
const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// A worker whose last heartbeat is older than this is stale.
    pub heartbeat_ttl: Duration,
    pub alert_history_max: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl: Duration::from_secs(20),
            alert_history_max: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Degraded,
    Error,
    Unknown,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Status::Ok => "ok",
            Status::Degraded => "degraded",
            Status::Error => "error",
            Status::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub status: Status,
    pub message: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub component: String,
    pub status: Status,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub task_queue: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerView {
    pub worker_id: String,
    pub task_queue: String,
    pub version: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub age_secs: i64,
    pub stale: bool,
}

/// Everything the monitor knows at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub overall: Status,
    pub components: BTreeMap<String, ComponentStatus>,
    pub workers: BTreeMap<String, WorkerView>,
    pub alerts: Vec<Alert>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct WorkerEntry {
    heartbeat: WorkerHeartbeat,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MonitorState {
    components: BTreeMap<String, ComponentStatus>,
    workers: HashMap<String, WorkerEntry>,
    alerts: VecDeque<Alert>,
    last_run_at: Option<DateTime<Utc>>,
}

impl MonitorState {
    /// Drops workers last seen before `cutoff`.
    fn forget_workers_before(&mut self, cutoff: DateTime<Utc>) {
        let before = self.workers.len();
        self.workers.retain(|_, entry| entry.last_seen >= cutoff);
        let evicted = before - self.workers.len();
        if evicted > 0 {
            tracing::info!(evicted, "forgot silent workers");
        }
    }

    fn evict_longest_silent(&mut self) {
        let oldest = self
            .workers
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.workers.remove(&key);
        }
    }
}

#[derive(Debug)]
pub struct HealthMonitor {
    config: MonitorConfig,
    state: RwLock<MonitorState>,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let mut state = MonitorState::default();
        for component in [ENGINE_COMPONENT, WORKERS_COMPONENT] {
            state.components.insert(
                component.to_string(),
                ComponentStatus {
                    status: Status::Unknown,
                    message: "not checked yet".to_string(),
                    updated_at: None,
                },
            );
        }

        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub async fn heartbeat(&self, heartbeat: WorkerHeartbeat, now: DateTime<Utc>) {
        let key = format!("{}:{}", heartbeat.task_queue, heartbeat.worker_id);
        tracing::debug!(worker = %key, "worker heartbeat");
        let mut state = self.state.write().await;
        if !state.workers.contains_key(&key) {
            state.forget_workers_before(self.retention_cutoff(now));
            if state.workers.len() >= MAX_WORKERS {
                state.evict_longest_silent();
            }
        }
        state
            .workers
            .insert(key, WorkerEntry { heartbeat, last_seen: now });
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let retention = TimeDelta::from_std(self.config.heartbeat_ttl)
            .ok()
            .and_then(|ttl| ttl.checked_mul(WORKER_RETENTION_TTLS))
            .unwrap_or(TimeDelta::MAX);
        now.checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Sets a component's status, raising an alert when it changed.
    pub async fn update_component(
        &self,
        component: &str,
        status: Status,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let message = message.into();
        let mut state = self.state.write().await;

        let previous = state.components.get(component).map(|current| current.status);
        if previous != Some(status) {
            tracing::warn!(component, %status, %message, "component status changed");
            metrics::counter!("monitor_alerts_total", "component" => component.to_string())
                .increment(1);
            state.alerts.push_back(Alert {
                id: format!("{component}-{}", now.timestamp_millis()),
                component: component.to_string(),
                status,
                message: message.clone(),
                created_at: now,
            });
            while state.alerts.len() > self.config.alert_history_max {
                state.alerts.pop_front();
            }
        }

        state.components.insert(
            component.to_string(),
            ComponentStatus {
                status,
                message,
                updated_at: Some(now),
            },
        );
    }

    /// One collector pass over every component.
    pub async fn collect(&self, active_carts: usize, accepting: bool, now: DateTime<Utc>) {
        let (engine_status, engine_message) = if accepting {
            (Status::Ok, format!("{active_carts} active carts"))
        } else {
            (Status::Degraded, "engine is shutting down".to_string())
        };
        self.update_component(ENGINE_COMPONENT, engine_status, engine_message, now)
            .await;

        let cutoff = self.retention_cutoff(now);
        self.state.write().await.forget_workers_before(cutoff);
        let workers = self.workers(now).await;
        let stale = workers.values().filter(|worker| worker.stale).count();
        let (workers_status, workers_message) = match (workers.len(), stale) {
            (0, _) => (Status::Unknown, "no worker heartbeats".to_string()),
            (_, 0) => (Status::Ok, format!("{} workers reporting", workers.len())),
            (total, stale) => (Status::Degraded, format!("{stale} of {total} workers stale")),
        };
        self.update_component(WORKERS_COMPONENT, workers_status, workers_message, now)
            .await;

        self.state.write().await.last_run_at = Some(now);
    }

    pub async fn workers(&self, now: DateTime<Utc>) -> BTreeMap<String, WorkerView> {
        let ttl = i64::try_from(self.config.heartbeat_ttl.as_secs()).unwrap_or(i64::MAX);
        self.state
            .read()
            .await
            .workers
            .iter()
            .map(|(key, entry)| {
                let age_secs = (now - entry.last_seen).num_seconds();
                let view = WorkerView {
                    worker_id: entry.heartbeat.worker_id.clone(),
                    task_queue: entry.heartbeat.task_queue.clone(),
                    version: entry.heartbeat.version.clone(),
                    last_seen: entry.last_seen,
                    age_secs,
                    stale: age_secs > ttl,
                };
                (key.clone(), view)
            })
            .collect()
    }

    pub async fn component(&self, component: &str) -> Option<ComponentStatus> {
        self.state.read().await.components.get(component).cloned()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.state.read().await.alerts.iter().cloned().collect()
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> MonitorSnapshot {
        let workers = self.workers(now).await;
        let state = self.state.read().await;

        let overall = if state
            .components
            .values()
            .all(|component| component.status == Status::Ok)
        {
            Status::Ok
        } else {
            Status::Degraded
        };
        let skip = state.alerts.len().saturating_sub(RECENT_ALERTS);

        MonitorSnapshot {
            overall,
            components: state.components.clone(),
            workers,
            alerts: state.alerts.iter().skip(skip).cloned().collect(),
            last_run_at: state.last_run_at,
        }
    }
}
