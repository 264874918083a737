//! Retrying shipment dispatch.

use std::time::Instant;

use async_trait::async_trait;
use domain::{Cart, ShipmentFailureKind, ShipmentReceipt};
use tokio::sync::watch;

use super::endpoint::{EndpointError, ShipmentEndpoint, ShipmentRequest};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::shutdown_requested;

/// Attempts already spent on a cart's shipment, as recorded in its log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipmentProgress {
    pub attempts_made: u32,
    pub last_error: Option<String>,
    pub last_status: Option<u16>,
}

impl ShipmentProgress {
    pub fn of(cart: &Cart) -> Self {
        Self {
            attempts_made: cart.shipment_attempts(),
            last_error: cart.last_shipment_error().map(str::to_string),
            last_status: cart.last_shipment_status(),
        }
    }
}

/// A definitive shipment failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentFailure {
    pub kind: ShipmentFailureKind,
    pub error: String,
    pub attempts: u32,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Scheduled {
        receipt: ShipmentReceipt,
        attempt: u32,
    },
    Failed(ShipmentFailure),
    /// Shutdown was requested between attempts; progress so far is journaled.
    Interrupted,
}

/// Durable record of failed attempts.
///
/// `dispatch` reports each failure before deciding what to do next, so a
/// restart resumes from the right attempt number.
#[async_trait]
pub trait AttemptJournal: Send {
    async fn attempt_failed(&mut self, attempt: u32, error: &EndpointError) -> Result<()>;
}

/// Calls the shipment endpoint under a [`RetryPolicy`].
///
/// It never touches cart state itself: failures go to the journal and the
/// final result goes back to the caller.
#[derive(Debug)]
pub struct ShipmentOrchestrator<E> {
    endpoint: E,
    policy: RetryPolicy,
}

impl<E: ShipmentEndpoint> ShipmentOrchestrator<E> {
    pub fn new(endpoint: E, policy: RetryPolicy) -> Self {
        Self { endpoint, policy }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dispatches `request`, continuing from `progress`.
    ///
    /// 4xx answers fail at once as `PolicyRejected`. Any other failure is
    /// retried until the attempt budget is spent, which yields
    /// `RetriesExhausted`. Shutdown is honoured before an attempt and while
    /// backing off; an attempt already in flight runs to completion.
    #[tracing::instrument(skip_all, fields(user_id = %request.user_id))]
    pub async fn dispatch<J: AttemptJournal>(
        &self,
        request: &ShipmentRequest,
        progress: ShipmentProgress,
        journal: &mut J,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<DispatchOutcome> {
        let started = Instant::now();
        let mut attempts = progress.attempts_made;
        let mut last_error = progress.last_error;
        let mut last_status = progress.last_status;

        let outcome = loop {
            if !self.policy.has_budget(attempts) {
                break DispatchOutcome::Failed(ShipmentFailure {
                    kind: ShipmentFailureKind::RetriesExhausted,
                    error: last_error.unwrap_or_else(|| "retry budget exhausted".to_string()),
                    attempts,
                    status: last_status,
                });
            }

            if *shutdown.borrow() {
                break DispatchOutcome::Interrupted;
            }

            if attempts > 0 {
                let delay = self.policy.backoff_after(attempts);
                tracing::debug!(?delay, attempts, "backing off before next shipment attempt");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = shutdown_requested(shutdown) => break DispatchOutcome::Interrupted,
                }
            }

            attempts += 1;
            let result = tokio::time::timeout(
                self.policy.attempt_timeout,
                self.endpoint.schedule(request),
            )
            .await
            .unwrap_or(Err(EndpointError::Timeout));

            match result {
                Ok(receipt) => {
                    metrics::counter!("shipment_attempts_total", "result" => "scheduled")
                        .increment(1);
                    tracing::info!(attempt = attempts, tracking_id = %receipt.tracking_id, "shipment scheduled");
                    break DispatchOutcome::Scheduled {
                        receipt,
                        attempt: attempts,
                    };
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    metrics::counter!(
                        "shipment_attempts_total",
                        "result" => if retryable { "retryable" } else { "rejected" }
                    )
                    .increment(1);
                    tracing::warn!(attempt = attempts, retryable, error = %err, "shipment attempt failed");

                    journal.attempt_failed(attempts, &err).await?;

                    if !retryable {
                        break DispatchOutcome::Failed(ShipmentFailure {
                            kind: ShipmentFailureKind::PolicyRejected,
                            error: err.to_string(),
                            attempts,
                            status: err.status(),
                        });
                    }
                    last_status = err.status();
                    last_error = Some(err.to_string());
                }
            }
        };

        metrics::histogram!("shipment_dispatch_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }
}
