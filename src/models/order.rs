use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::opportunity::AssignmentRequest;
use crate::models::picker::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Assigned,
    InTransit,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Position along the lifecycle. CANCELLED ranks above everything it can
    /// be reached from, so a legal history is always non-decreasing.
    pub fn rank(&self) -> u8 {
        match self {
            OrderStatus::PendingPayment => 0,
            OrderStatus::Paid => 1,
            OrderStatus::Assigned => 2,
            OrderStatus::InTransit => 3,
            OrderStatus::Delivered => 4,
            OrderStatus::Completed => 5,
            OrderStatus::Cancelled => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (Paid, Assigned)
                | (Paid, Cancelled)
                | (Assigned, InTransit)
                | (Assigned, Cancelled)
                | (InTransit, Delivered)
                | (InTransit, Cancelled)
                | (Delivered, Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    NotDue,
    InFlight,
    Released,
    PendingRetry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_name: String,
    pub total_amount: i64,
    pub shipping_fee: i64,
    pub vendor_ids: Vec<Uuid>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub customer_confirmation_code: Option<String>,
    pub accepted_opportunity_id: Option<Uuid>,
    pub assignment_round: u32,
    pub last_assignment: Option<AssignmentRequest>,
    pub release_state: ReleaseState,
    pub release_attempts: u32,
    pub next_release_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Order {
    /// The only place `status` is written.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "order {} cannot move from {:?} to {:?}",
                self.order_number, self.status, next
            )));
        }

        self.status = next;
        self.updated_at = now;
        match next {
            OrderStatus::Paid => self.paid_at = Some(now),
            OrderStatus::Completed => self.completed_at = Some(now),
            OrderStatus::Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    pub fn is_assignable(&self) -> bool {
        match self.status {
            OrderStatus::Paid => true,
            OrderStatus::Assigned => self.accepted_opportunity_id.is_none(),
            _ => false,
        }
    }

    pub fn is_multi_vendor(&self) -> bool {
        self.vendor_ids.len() > 1
    }
}

pub fn build_order_number(order_id: Uuid, now: DateTime<Utc>) -> String {
    let date = now.format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    format!("ORD-{}-{}", date, suffix[..8].to_ascii_uppercase())
}
