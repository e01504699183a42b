use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::picker::{GeoPoint, Picker, PickerStatus, PickerType};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pickers", post(register_picker).get(list_pickers))
        .route("/pickers/:id/status", patch(update_picker_status))
        .route("/pickers/:id/location", patch(update_picker_location))
}

#[derive(Deserialize)]
pub struct RegisterPickerRequest {
    pub name: String,
    pub phone: String,
    pub picker_type: PickerType,
    pub location: GeoPoint,
    #[serde(default)]
    pub completed_deliveries: u32,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: PickerStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn register_picker(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterPickerRequest>,
) -> Result<Json<Picker>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::BadRequest("phone cannot be empty".to_string()));
    }

    let picker = Picker {
        id: Uuid::new_v4(),
        name: payload.name,
        phone: payload.phone,
        picker_type: payload.picker_type,
        location: payload.location,
        status: PickerStatus::Available,
        completed_deliveries: payload.completed_deliveries,
        updated_at: state.now(),
    };

    state.store.insert_picker(picker.clone());
    tracing::info!(picker_id = %picker.id, picker_type = ?picker.picker_type, "picker registered");
    Ok(Json(picker))
}

async fn list_pickers(State(state): State<Arc<AppState>>) -> Json<Vec<Picker>> {
    let mut pickers = state.store.pickers();
    pickers.sort_by(|a, b| a.name.cmp(&b.name));
    Json(pickers)
}

async fn update_picker_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Picker>, AppError> {
    let now = state.now();
    state
        .store
        .update_picker(id, |picker| {
            picker.status = payload.status;
            picker.updated_at = now;
        })
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("picker {id} not found")))
}

async fn update_picker_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Picker>, AppError> {
    let now = state.now();
    state
        .store
        .update_picker(id, |picker| {
            picker.location = payload.location;
            picker.updated_at = now;
        })
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("picker {id} not found")))
}
