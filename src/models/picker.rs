use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PickerStatus {
    Available,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PickerType {
    Picker,
    StudentPicker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Picker {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub picker_type: PickerType,
    pub location: GeoPoint,
    pub status: PickerStatus,
    pub completed_deliveries: u32,
    pub updated_at: DateTime<Utc>,
}
