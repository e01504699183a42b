use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::engine::arbiter::{accept, delivery_details, OpportunityDetails};
use crate::engine::delivery::{
    confirm_delivery, delivery_status, mark_picked_up, DeliveryConfirmation, DeliveryStatusView,
};
use crate::error::AppError;
use crate::models::order::OrderStatus;
use crate::state::AppState;
use crate::store::RiderSnapshot;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/delivery-details/:code/", get(get_delivery_details))
        .route("/accept-delivery/", post(accept_delivery))
        .route("/delivery/pickup/", post(pickup))
        .route("/delivery/confirm/", post(confirm))
        .route("/delivery/confirm/:code/", get(get_confirm_status))
}

#[derive(Deserialize)]
pub struct AcceptDeliveryRequest {
    pub unique_code: String,
    pub rider_name: String,
    pub rider_phone: String,
    #[serde(default)]
    pub pickup_time: String,
}

#[derive(Serialize)]
pub struct AcceptDeliveryResponse {
    pub success: bool,
    pub order_number: String,
    pub rider_name: String,
    pub rider_phone: String,
    pub pickup_time: String,
    pub delivery_confirmation_code: String,
    pub other_opportunities_cancelled: usize,
}

#[derive(Deserialize)]
pub struct DeliveryCodeRequest {
    pub delivery_confirmation_code: String,
}

#[derive(Serialize)]
pub struct PickupResponse {
    pub order_number: String,
    pub status: OrderStatus,
}

async fn get_delivery_details(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<OpportunityDetails>, AppError> {
    Ok(Json(delivery_details(&state, &code)?))
}

async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AcceptDeliveryRequest>,
) -> Result<Json<AcceptDeliveryResponse>, AppError> {
    let rider = RiderSnapshot {
        rider_name: payload.rider_name,
        rider_phone: payload.rider_phone,
        pickup_time: payload.pickup_time,
    };
    let outcome = accept(&state, payload.unique_code.trim(), rider)?;

    Ok(Json(AcceptDeliveryResponse {
        success: true,
        order_number: outcome.order_number,
        rider_name: outcome.acceptance.rider_name,
        rider_phone: outcome.acceptance.rider_phone,
        pickup_time: outcome.acceptance.pickup_time,
        delivery_confirmation_code: outcome.acceptance.delivery_confirmation_code,
        other_opportunities_cancelled: outcome.other_opportunities_cancelled,
    }))
}

async fn pickup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeliveryCodeRequest>,
) -> Result<Json<PickupResponse>, AppError> {
    let order = mark_picked_up(&state, payload.delivery_confirmation_code.trim())?;
    Ok(Json(PickupResponse {
        order_number: order.order_number,
        status: order.status,
    }))
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeliveryCodeRequest>,
) -> Result<Json<DeliveryConfirmation>, AppError> {
    Ok(Json(confirm_delivery(
        &state,
        payload.delivery_confirmation_code.trim(),
    )?))
}

async fn get_confirm_status(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<DeliveryStatusView>, AppError> {
    Ok(Json(delivery_status(&state, &code)?))
}
