use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MultiVendorPolicy;
use crate::engine::queue::AssignmentJob;
use crate::engine::selection::select_pickers;
use crate::error::AppError;
use crate::models::event::DeliveryEvent;
use crate::models::opportunity::{AssignmentRequest, DeliveryOpportunity, SelectionPolicy};
use crate::state::AppState;

pub async fn run_assignment_worker(state: Arc<AppState>, mut job_rx: mpsc::Receiver<AssignmentJob>) {
    info!("assignment worker started");

    while let Some(job) = job_rx.recv().await {
        state.metrics.assignment_queue_depth.dec();

        let start = Instant::now();
        match create_opportunities(&state, job.order_id, job.request) {
            Ok(opportunities) if opportunities.is_empty() => {
                warn!(order_id = %job.order_id, "queued assignment found no eligible pickers");
            }
            Ok(opportunities) => {
                info!(
                    order_id = %job.order_id,
                    offered = opportunities.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "queued assignment processed"
                );
            }
            Err(err) => {
                error!(order_id = %job.order_id, error = %err, "queued assignment failed");
            }
        }
    }

    warn!("assignment worker stopped: queue channel closed");
}

pub fn create_opportunities(
    state: &AppState,
    order_id: Uuid,
    request: AssignmentRequest,
) -> Result<Vec<DeliveryOpportunity>, AppError> {
    let order = state
        .store
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if !order.is_assignable() {
        return Err(AppError::InvalidState(format!(
            "order {} is {:?} and cannot be assigned",
            order.order_number, order.status
        )));
    }
    if order.is_multi_vendor()
        && state.config.multi_vendor_policy == MultiVendorPolicy::RejectMultiVendor
    {
        return Err(AppError::InvalidState(format!(
            "order {} spans {} vendors; split it per vendor before assigning",
            order.order_number,
            order.vendor_ids.len()
        )));
    }

    let selected = select_pickers(
        &request,
        state.store.pickers(),
        &order,
        &state.config,
        &mut rand::thread_rng(),
    )?;

    if selected.is_empty() {
        info!(
            order_id = %order.id,
            policy = request.policy.name(),
            "no eligible pickers for order"
        );
        return Ok(Vec::new());
    }

    let ttl = Duration::try_seconds(state.config.opportunity_ttl_secs)
        .filter(|ttl| *ttl > Duration::zero())
        .ok_or_else(|| {
            AppError::Internal(format!(
                "opportunity ttl of {}s is out of range",
                state.config.opportunity_ttl_secs
            ))
        })?;
    let opportunities = state
        .store
        .open_round(order.id, &selected, &request, ttl, state.now())?;

    state
        .metrics
        .opportunities_created_total
        .inc_by(opportunities.len() as u64);

    for opportunity in &opportunities {
        state.publish(DeliveryEvent::OpportunityOffered {
            order_id: order.id,
            order_number: order.order_number.clone(),
            picker_id: opportunity.picker_id,
            opportunity_code: opportunity.opportunity_code.clone(),
            expires_at: opportunity.expires_at,
        });
    }

    info!(
        order_id = %order.id,
        policy = request.policy.name(),
        round = opportunities.first().map(|opportunity| opportunity.round).unwrap_or_default(),
        offered = opportunities.len(),
        "opportunities created"
    );

    Ok(opportunities)
}

pub fn random_assign(
    state: &AppState,
    order_id: Uuid,
) -> Result<Option<DeliveryOpportunity>, AppError> {
    let mut opportunities = create_opportunities(state, order_id, SelectionPolicy::RandomSingle.into())?;
    Ok(opportunities.pop())
}

pub fn manual_assign(
    state: &AppState,
    order_id: Uuid,
    picker_ids: Vec<Uuid>,
) -> Result<Vec<DeliveryOpportunity>, AppError> {
    create_opportunities(state, order_id, SelectionPolicy::Manual { picker_ids }.into())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::config::Config;
    use crate::engine::testing::{harness, harness_with, paid_order, register_pickers};
    use crate::models::opportunity::OpportunityStatus;
    use crate::models::order::OrderStatus;
    use crate::models::picker::PickerStatus;

    #[test]
    fn round_shares_one_expiry_and_leaves_order_paid() {
        let h = harness();
        register_pickers(&h.state, 3);
        let order = paid_order(&h.state);

        let opportunities =
            create_opportunities(&h.state, order.id, SelectionPolicy::AllEligible.into()).unwrap();

        assert_eq!(opportunities.len(), 3);
        let expiry = opportunities[0].expires_at;
        assert_eq!(expiry, h.clock.now() + Duration::minutes(10));
        assert!(opportunities.iter().all(|opportunity| opportunity.expires_at == expiry));
        assert!(opportunities
            .iter()
            .all(|opportunity| opportunity.status == OpportunityStatus::Pending));
        assert_eq!(
            h.state.store.order(order.id).unwrap().status,
            OrderStatus::Paid
        );
        assert_eq!(h.state.metrics.opportunities_created_total.get(), 3);
    }

    #[test]
    fn empty_selection_creates_nothing() {
        let h = harness();
        let pickers = register_pickers(&h.state, 2);
        for picker in &pickers {
            h.state.store.update_picker(picker.id, |p| p.status = PickerStatus::Offline);
        }
        let order = paid_order(&h.state);

        let opportunities =
            create_opportunities(&h.state, order.id, SelectionPolicy::AllEligible.into()).unwrap();
        assert!(opportunities.is_empty());
        assert_eq!(h.state.store.opportunity_count(), 0);
        assert_eq!(h.state.store.order(order.id).unwrap().assignment_round, 0);
    }

    #[test]
    fn random_assign_offers_a_single_picker() {
        let h = harness();
        register_pickers(&h.state, 4);
        let order = paid_order(&h.state);

        let opportunity = random_assign(&h.state, order.id).unwrap().unwrap();
        assert_eq!(opportunity.policy, "random_single");
        assert_eq!(h.state.store.opportunities_for(order.id).len(), 1);
    }

    #[test]
    fn manual_assign_targets_named_pickers() {
        let h = harness();
        let pickers = register_pickers(&h.state, 3);
        let order = paid_order(&h.state);

        let opportunities = manual_assign(&h.state, order.id, vec![pickers[2].id]).unwrap();
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].picker_id, pickers[2].id);
    }

    #[test]
    fn unknown_order_is_not_found() {
        let h = harness();
        let err = create_opportunities(&h.state, Uuid::new_v4(), SelectionPolicy::AllEligible.into())
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn multi_vendor_orders_can_be_refused() {
        let h = harness_with(Config {
            multi_vendor_policy: MultiVendorPolicy::RejectMultiVendor,
            ..Config::default()
        });
        register_pickers(&h.state, 1);
        let order = paid_order(&h.state);
        h.state.store.insert_order(crate::models::order::Order {
            vendor_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            ..order.clone()
        });

        let err = create_opportunities(&h.state, order.id, SelectionPolicy::AllEligible.into())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn oversized_ttl_is_an_error_not_a_panic() {
        let h = harness_with(Config {
            opportunity_ttl_secs: i64::MAX,
            ..Config::default()
        });
        register_pickers(&h.state, 1);
        let order = paid_order(&h.state);

        let err = create_opportunities(&h.state, order.id, SelectionPolicy::AllEligible.into())
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(h.state.store.opportunities_for(order.id).is_empty());
    }

    #[tokio::test]
    async fn worker_drains_queued_jobs() {
        let mut h = harness();
        register_pickers(&h.state, 2);
        let order = paid_order(&h.state);

        crate::engine::queue::enqueue_assignment(
            &h.state,
            AssignmentJob {
                order_id: order.id,
                request: SelectionPolicy::AllEligible.into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(h.state.metrics.assignment_queue_depth.get(), 1);

        let rx = h.take_jobs();
        let worker = tokio::spawn(run_assignment_worker(h.state.clone(), rx));

        for _ in 0..50 {
            if h.state.store.opportunities_for(order.id).len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        worker.abort();

        assert_eq!(h.state.store.opportunities_for(order.id).len(), 2);
        assert_eq!(h.state.metrics.assignment_queue_depth.get(), 0);
    }
}
