use std::sync::Arc;

use chrono::Duration;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::DeliveryEvent;
use crate::models::order::ReleaseState;
use crate::state::AppState;

#[derive(Debug, Error)]
#[error("payment release failed: {0}")]
pub struct ReleaseError(pub String);

/// Implementations need not be idempotent; at most one call per order is in flight.
pub trait PaymentRelease: Send + Sync {
    fn release_funds(&self, order_id: Uuid) -> BoxFuture<'static, Result<(), ReleaseError>>;
}

pub struct LoggingRelease;

impl PaymentRelease for LoggingRelease {
    fn release_funds(&self, order_id: Uuid) -> BoxFuture<'static, Result<(), ReleaseError>> {
        Box::pin(async move {
            info!(order_id = %order_id, "payment release requested");
            Ok(())
        })
    }
}

pub async fn run_release(state: &AppState, order_id: Uuid, attempt: u32) -> Result<ReleaseState, AppError> {
    let timeout = state.config.release_timeout();
    let (released, outcome) =
        match tokio::time::timeout(timeout, state.payments.release_funds(order_id)).await {
            Ok(Ok(())) => (true, "released"),
            Ok(Err(err)) => {
                warn!(order_id = %order_id, attempt, error = %err, "payment release failed; will retry");
                (false, "failed")
            }
            Err(_) => {
                warn!(
                    order_id = %order_id,
                    attempt,
                    timeout_ms = state.config.release_timeout_ms,
                    "payment gateway timed out; will retry"
                );
                (false, "timed_out")
            }
        };

    let retry_base = Duration::seconds(state.config.release_retry_base_secs);
    let order = state
        .store
        .finish_release(order_id, attempt, released, retry_base, state.now())?;

    state
        .metrics
        .payment_releases_total
        .with_label_values(&[outcome])
        .inc();
    state.publish(DeliveryEvent::PaymentRelease { order_id, released });

    if released {
        info!(order_id = %order_id, attempts = order.release_attempts, "payment released");
    }
    Ok(order.release_state)
}

/// Recorded even if the caller's future is dropped.
pub async fn spawn_release(
    state: &Arc<AppState>,
    order_id: Uuid,
    attempt: u32,
) -> Result<ReleaseState, AppError> {
    let state = Arc::clone(state);
    tokio::spawn(async move { run_release(&state, order_id, attempt).await })
        .await
        .map_err(|err| AppError::Internal(format!("release task for order {order_id} failed: {err}")))?
}

pub async fn retry_release(state: &Arc<AppState>, order_id: Uuid) -> Result<ReleaseState, AppError> {
    let attempt = state
        .store
        .claim_release_retry(order_id, true, state.config.release_lease(), state.now())?
        .ok_or_else(|| AppError::InvalidState(format!("order {order_id} has no release to retry")))?;
    spawn_release(state, order_id, attempt).await
}
