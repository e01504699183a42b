use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAcceptance {
    pub id: Uuid,
    pub order_id: Uuid,
    pub opportunity_id: Uuid,
    pub picker_id: Uuid,
    pub rider_name: String,
    pub rider_phone: String,
    pub pickup_time: String,
    pub accepted_at: DateTime<Utc>,
    pub delivery_confirmation_code: String,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerReceiptConfirmation {
    pub order_id: Uuid,
    pub customer_confirmation_code: String,
    pub issued_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub already_confirmed: bool,
}
