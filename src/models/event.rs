use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    OpportunityOffered {
        order_id: Uuid,
        order_number: String,
        picker_id: Uuid,
        opportunity_code: String,
        expires_at: DateTime<Utc>,
    },
    OpportunityAccepted {
        order_id: Uuid,
        picker_id: Uuid,
        other_opportunities_cancelled: usize,
    },
    OpportunityExpired {
        order_id: Uuid,
        picker_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        status: OrderStatus,
    },
    PaymentRelease {
        order_id: Uuid,
        released: bool,
    },
}

impl DeliveryEvent {
    pub fn picker_id(&self) -> Option<Uuid> {
        match self {
            DeliveryEvent::OpportunityOffered { picker_id, .. }
            | DeliveryEvent::OpportunityAccepted { picker_id, .. }
            | DeliveryEvent::OpportunityExpired { picker_id, .. } => Some(*picker_id),
            DeliveryEvent::OrderStatusChanged { .. } | DeliveryEvent::PaymentRelease { .. } => None,
        }
    }
}
