use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{debug, error, info, warn};

use crate::config::ReassignmentPolicy;
use crate::engine::queue::{enqueue_assignment, AssignmentJob};
use crate::engine::release::run_release;
use crate::models::event::DeliveryEvent;
use crate::state::AppState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub reassigned: usize,
    pub releases_retried: usize,
}

pub async fn run_sweeper(state: Arc<AppState>) {
    let period = StdDuration::from_secs(state.config.sweep_interval_secs);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = state.config.sweep_interval_secs, "expiry sweeper started");

    loop {
        ticker.tick().await;
        let report = sweep_once(&state).await;
        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                reassigned = report.reassigned,
                releases_retried = report.releases_retried,
                "sweep finished"
            );
        }
    }
}

pub async fn sweep_once(state: &AppState) -> SweepReport {
    let now = state.now();
    let mut report = SweepReport::default();

    for opportunity_id in state.store.pending_past_expiry(now) {
        let Some(expired) = state.store.expire_if_due(opportunity_id, now) else {
            continue;
        };
        report.expired += 1;
        state.metrics.opportunities_expired_total.inc();
        state.publish(DeliveryEvent::OpportunityExpired {
            order_id: expired.order_id,
            picker_id: expired.picker_id,
        });
        debug!(order_id = %expired.order_id, picker_id = %expired.picker_id, "opportunity expired");
    }

    // Lazy expiry on read also exhausts rounds.
    if state.config.reassignment_policy == ReassignmentPolicy::Automatic {
        for order_id in state.store.reassignment_candidates(now) {
            let order = match state.store.claim_reassignment(order_id, now) {
                Ok(Some(order)) => order,
                Ok(None) => continue,
                Err(err) => {
                    error!(order_id = %order_id, error = %err, "failed to claim reassignment");
                    continue;
                }
            };
            if order.assignment_round >= state.config.max_assignment_rounds {
                warn!(
                    order_id = %order_id,
                    rounds = order.assignment_round,
                    "order left unassigned after final round"
                );
                continue;
            }

            let request = order
                .last_assignment
                .unwrap_or_else(|| state.config.default_policy.clone().into());
            match enqueue_assignment(state, AssignmentJob { order_id, request }).await {
                Ok(()) => report.reassigned += 1,
                Err(err) => error!(order_id = %order_id, error = %err, "failed to requeue assignment"),
            }
        }
    }

    let lease = state.config.release_lease();
    for order_id in state.store.releases_due(now) {
        let attempt = match state.store.claim_release_retry(order_id, false, lease, now) {
            Ok(Some(attempt)) => attempt,
            Ok(None) => continue,
            Err(err) => {
                error!(order_id = %order_id, error = %err, "failed to claim release retry");
                continue;
            }
        };
        report.releases_retried += 1;
        if let Err(err) = run_release(state, order_id, attempt).await {
            error!(order_id = %order_id, error = %err, "release retry failed to record");
        }
    }

    report
}
