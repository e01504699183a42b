use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::acceptance::DeliveryAcceptance;
use crate::models::event::DeliveryEvent;
use crate::models::opportunity::{DeliveryOpportunity, OpportunityStatus};
use crate::models::order::{Order, OrderStatus};
use crate::models::picker::{GeoPoint, PickerStatus};
use crate::state::AppState;
use crate::store::RiderSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_number: String,
    pub status: OrderStatus,
    pub total_amount: i64,
    pub shipping_fee: i64,
    pub vendor_count: usize,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_number: order.order_number.clone(),
            status: order.status,
            total_amount: order.total_amount,
            shipping_fee: order.shipping_fee,
            vendor_count: order.vendor_ids.len(),
            pickup: order.pickup,
            dropoff: order.dropoff,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpportunityDetails {
    pub opportunity_code: String,
    pub status: OpportunityStatus,
    pub expires_at: DateTime<Utc>,
    pub order: OrderSummary,
    pub can_accept: bool,
}

#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub order_number: String,
    pub acceptance: DeliveryAcceptance,
    pub other_opportunities_cancelled: usize,
}

fn lookup(state: &AppState, code: &str) -> Result<DeliveryOpportunity, AppError> {
    state
        .store
        .opportunity_by_code(code)
        .ok_or_else(|| AppError::NotFound("delivery opportunity not found".to_string()))
}

fn load_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state
        .store
        .order(order_id)
        .ok_or_else(|| AppError::Internal(format!("opportunity references missing order {order_id}")))
}

/// Expiry is applied lazily so a stale link never advertises `can_accept`.
pub fn delivery_details(state: &AppState, code: &str) -> Result<OpportunityDetails, AppError> {
    let now = state.now();
    let mut opportunity = lookup(state, code)?;

    if let Some(expired) = state.store.expire_if_due(opportunity.id, now) {
        state.metrics.opportunities_expired_total.inc();
        opportunity = expired;
    }

    let order = load_order(state, opportunity.order_id)?;
    let can_accept = opportunity.is_live(now)
        && order.is_assignable()
        && order.accepted_opportunity_id.is_none();

    Ok(OpportunityDetails {
        opportunity_code: opportunity.opportunity_code,
        status: opportunity.status,
        expires_at: opportunity.expires_at,
        order: OrderSummary::from(&order),
        can_accept,
    })
}

pub fn accept(state: &AppState, code: &str, rider: RiderSnapshot) -> Result<AcceptOutcome, AppError> {
    if rider.rider_name.trim().is_empty() {
        return Err(AppError::BadRequest("rider_name cannot be empty".to_string()));
    }
    if rider.rider_phone.trim().is_empty() {
        return Err(AppError::BadRequest("rider_phone cannot be empty".to_string()));
    }

    let result = try_accept(state, code, rider);
    let outcome = match &result {
        Ok(_) => "won",
        Err(AppError::AlreadyResolved(_)) => "lost",
        Err(AppError::Expired) => "expired",
        Err(_) => "rejected",
    };
    state
        .metrics
        .acceptances_total
        .with_label_values(&[outcome])
        .inc();
    result
}

fn try_accept(state: &AppState, code: &str, rider: RiderSnapshot) -> Result<AcceptOutcome, AppError> {
    let now = state.now();
    let opportunity = lookup(state, code)?;

    if opportunity.status != OpportunityStatus::Pending {
        let sibling_won = state
            .store
            .order(opportunity.order_id)
            .is_some_and(|order| order.accepted_opportunity_id.is_some());
        if let Some(reason) = opportunity.status.resolved_reason(sibling_won) {
            return Err(AppError::AlreadyResolved(reason));
        }
    }

    if opportunity.is_past_expiry(now) {
        if state.store.expire_if_due(opportunity.id, now).is_some() {
            state.metrics.opportunities_expired_total.inc();
        }
        return Err(AppError::Expired);
    }

    let commit = match state.store.commit_acceptance(
        opportunity.id,
        rider,
        state.config.auto_in_transit_on_accept,
        now,
    ) {
        Ok(commit) => commit,
        Err(err) => {
            if matches!(err, AppError::AlreadyResolved(_)) {
                warn!(
                    order_id = %opportunity.order_id,
                    picker_id = %opportunity.picker_id,
                    "accept lost the race at commit"
                );
            }
            return Err(err);
        }
    };

    let other_opportunities_cancelled = commit.cancelled.len();
    info!(
        order_id = %commit.order.id,
        picker_id = %commit.acceptance.picker_id,
        cancelled = other_opportunities_cancelled,
        status = ?commit.order.status,
        "delivery accepted"
    );

    state
        .store
        .update_picker(commit.acceptance.picker_id, |picker| {
            picker.status = PickerStatus::Busy;
            picker.updated_at = now;
        });

    state.publish(DeliveryEvent::OpportunityAccepted {
        order_id: commit.order.id,
        picker_id: commit.acceptance.picker_id,
        other_opportunities_cancelled,
    });
    state.publish(DeliveryEvent::OrderStatusChanged {
        order_id: commit.order.id,
        status: commit.order.status,
    });

    Ok(AcceptOutcome {
        order_number: commit.order.order_number,
        acceptance: commit.acceptance,
        other_opportunities_cancelled,
    })
}
