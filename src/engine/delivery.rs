use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::codes::CodePurpose;
use crate::engine::queue::{enqueue_assignment, AssignmentJob};
use crate::engine::release::spawn_release;
use crate::error::{AppError, PreconditionReason};
use crate::models::event::DeliveryEvent;
use crate::models::order::{build_order_number, Order, OrderStatus, ReleaseState};
use crate::models::picker::{GeoPoint, PickerStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_name: String,
    pub total_amount: i64,
    #[serde(default)]
    pub shipping_fee: i64,
    #[serde(default)]
    pub vendor_ids: Vec<Uuid>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryConfirmation {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_confirmation_code: String,
    pub already_confirmed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatusView {
    pub order_number: String,
    pub status: OrderStatus,
    pub rider_name: String,
    pub pickup_time: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub can_confirm: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptConfirmation {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub already_confirmed: bool,
    pub release_state: ReleaseState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptStatusView {
    pub order_number: String,
    pub status: OrderStatus,
    pub rider_name: Option<String>,
    pub rider_phone: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub already_confirmed: bool,
    pub can_confirm: bool,
}

/// A well-formed code of the wrong kind is a precondition failure, not a miss.
fn order_for_code(state: &AppState, code: &str, purpose: CodePurpose) -> Result<Uuid, AppError> {
    if let Some(order_id) = state.store.resolve_code(code, purpose) {
        return Ok(order_id);
    }
    match state.store.code_purpose(code) {
        Some(_) => Err(AppError::PreconditionFailed(PreconditionReason::InvalidCode)),
        None => Err(AppError::NotFound("confirmation code not found".to_string())),
    }
}

fn count_confirmation<T>(state: &AppState, stage: &str, result: &Result<T, AppError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(AppError::PreconditionFailed(_)) => "precondition_failed",
        Err(AppError::NotFound(_)) => "not_found",
        Err(_) => "error",
    };
    state
        .metrics
        .confirmations_total
        .with_label_values(&[stage, outcome])
        .inc();
}

pub fn place_order(state: &AppState, new_order: NewOrder) -> Result<Order, AppError> {
    if new_order.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest("customer_name cannot be empty".to_string()));
    }
    if new_order.total_amount <= 0 {
        return Err(AppError::BadRequest("total_amount must be > 0".to_string()));
    }
    if new_order.shipping_fee < 0 {
        return Err(AppError::BadRequest("shipping_fee cannot be negative".to_string()));
    }

    let now = state.now();
    let id = Uuid::new_v4();
    let order = Order {
        id,
        order_number: build_order_number(id, now),
        status: OrderStatus::PendingPayment,
        customer_name: new_order.customer_name,
        total_amount: new_order.total_amount,
        shipping_fee: new_order.shipping_fee,
        vendor_ids: new_order.vendor_ids,
        pickup: new_order.pickup,
        dropoff: new_order.dropoff,
        customer_confirmation_code: None,
        accepted_opportunity_id: None,
        assignment_round: 0,
        last_assignment: None,
        release_state: ReleaseState::NotDue,
        release_attempts: 0,
        next_release_attempt_at: None,
        created_at: now,
        updated_at: now,
        paid_at: None,
        completed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
    };

    state.store.insert_order(order.clone());
    info!(order_id = %order.id, order_number = %order.order_number, "order placed");
    Ok(order)
}

pub async fn mark_paid(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let (order, changed) = state.store.mark_paid(order_id, state.now())?;
    if !changed {
        return Ok(order);
    }

    info!(order_id = %order.id, "order paid");
    state.publish(DeliveryEvent::OrderStatusChanged {
        order_id: order.id,
        status: order.status,
    });

    if state.config.auto_assign_on_payment {
        enqueue_assignment(
            state,
            AssignmentJob {
                order_id: order.id,
                request: state.config.default_policy.clone().into(),
            },
        )
        .await?;
    }
    Ok(order)
}

pub fn mark_picked_up(state: &AppState, delivery_code: &str) -> Result<Order, AppError> {
    let order_id = order_for_code(state, delivery_code, CodePurpose::DeliveryConfirmation)?;
    let before = state.store.order(order_id).map(|order| order.status);
    let order = state.store.mark_picked_up(order_id, delivery_code, state.now())?;

    if before != Some(order.status) {
        info!(order_id = %order.id, "order picked up");
        state.publish(DeliveryEvent::OrderStatusChanged {
            order_id: order.id,
            status: order.status,
        });
    }
    Ok(order)
}

pub fn confirm_delivery(state: &AppState, delivery_code: &str) -> Result<DeliveryConfirmation, AppError> {
    let result = order_for_code(state, delivery_code, CodePurpose::DeliveryConfirmation)
        .and_then(|order_id| state.store.confirm_delivery(order_id, delivery_code, state.now()));
    count_confirmation(state, "delivery", &result);
    let commit = result?;

    if !commit.already_confirmed {
        info!(
            order_id = %commit.order.id,
            picker_id = %commit.acceptance.picker_id,
            "delivery confirmed by rider"
        );
        state.publish(DeliveryEvent::OrderStatusChanged {
            order_id: commit.order.id,
            status: commit.order.status,
        });
    }

    Ok(DeliveryConfirmation {
        order_id: commit.order.id,
        order_number: commit.order.order_number,
        status: commit.order.status,
        customer_confirmation_code: commit.customer_confirmation_code,
        already_confirmed: commit.already_confirmed,
    })
}

pub fn delivery_status(state: &AppState, delivery_code: &str) -> Result<DeliveryStatusView, AppError> {
    let order_id = order_for_code(state, delivery_code, CodePurpose::DeliveryConfirmation)?;
    let order = state
        .store
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    let acceptance = state
        .store
        .acceptance(order_id)
        .ok_or_else(|| AppError::Internal(format!("order {order_id} has a delivery code but no acceptance")))?;

    Ok(DeliveryStatusView {
        can_confirm: order.status == OrderStatus::InTransit && acceptance.delivered_at.is_none(),
        order_number: order.order_number,
        status: order.status,
        rider_name: acceptance.rider_name,
        pickup_time: acceptance.pickup_time,
        delivered_at: acceptance.delivered_at,
    })
}

pub async fn confirm_receipt(
    state: &Arc<AppState>,
    customer_code: &str,
) -> Result<ReceiptConfirmation, AppError> {
    let lease = state.config.release_lease();
    let result = order_for_code(state, customer_code, CodePurpose::CustomerConfirmation)
        .and_then(|order_id| state.store.confirm_receipt(order_id, customer_code, lease, state.now()));
    count_confirmation(state, "receipt", &result);
    let commit = result?;

    let mut release_state = commit.order.release_state;
    if commit.release_due {
        info!(order_id = %commit.order.id, "receipt confirmed by customer");
        state.publish(DeliveryEvent::OrderStatusChanged {
            order_id: commit.order.id,
            status: commit.order.status,
        });

        if let Some(acceptance) = state.store.acceptance(commit.order.id) {
            let now = state.now();
            state.store.update_picker(acceptance.picker_id, |picker| {
                picker.completed_deliveries = picker.completed_deliveries.saturating_add(1);
                if picker.status == PickerStatus::Busy {
                    picker.status = PickerStatus::Available;
                }
                picker.updated_at = now;
            });
        }

        match spawn_release(state, commit.order.id, commit.order.release_attempts).await {
            Ok(recorded) => release_state = recorded,
            Err(err) => {
                warn!(order_id = %commit.order.id, error = %err, "release attempt not recorded");
                if let Some(order) = state.store.order(commit.order.id) {
                    release_state = order.release_state;
                }
            }
        }
    }

    Ok(ReceiptConfirmation {
        order_id: commit.order.id,
        order_number: commit.order.order_number,
        status: commit.order.status,
        already_confirmed: commit.already_confirmed,
        release_state,
    })
}

pub fn receipt_status(state: &AppState, customer_code: &str) -> Result<ReceiptStatusView, AppError> {
    let order_id = order_for_code(state, customer_code, CodePurpose::CustomerConfirmation)?;
    let order = state
        .store
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    let acceptance = state.store.acceptance(order_id);
    let already_confirmed = state
        .store
        .receipt(order_id)
        .is_some_and(|receipt| receipt.confirmed_at.is_some());

    Ok(ReceiptStatusView {
        can_confirm: order.status == OrderStatus::Delivered && !already_confirmed,
        order_number: order.order_number,
        status: order.status,
        rider_name: acceptance.as_ref().map(|a| a.rider_name.clone()),
        rider_phone: acceptance.as_ref().map(|a| a.rider_phone.clone()),
        delivered_at: acceptance.and_then(|a| a.delivered_at),
        already_confirmed,
    })
}

pub fn cancel_order(
    state: &AppState,
    order_id: Uuid,
    reason: Option<String>,
) -> Result<Order, AppError> {
    let now = state.now();
    let commit = state.store.cancel_order(order_id, reason, now)?;
    if !commit.changed {
        return Ok(commit.order);
    }

    if let Some(picker_id) = commit.assigned_picker {
        state.store.update_picker(picker_id, |picker| {
            if picker.status == PickerStatus::Busy {
                picker.status = PickerStatus::Available;
            }
            picker.updated_at = now;
        });
    }
    if !commit.cancelled.is_empty() {
        warn!(
            order_id = %order_id,
            cancelled = commit.cancelled.len(),
            "pending opportunities withdrawn by order cancellation"
        );
    }

    info!(
        order_id = %order_id,
        reason = commit.order.cancellation_reason.as_deref().unwrap_or("unspecified"),
        "order cancelled"
    );
    state.publish(DeliveryEvent::OrderStatusChanged {
        order_id,
        status: commit.order.status,
    });
    Ok(commit.order)
}
