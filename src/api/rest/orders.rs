use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::assignment::{create_opportunities, manual_assign, random_assign};
use crate::engine::delivery::{cancel_order, mark_paid, place_order, NewOrder};
use crate::engine::release::retry_release;
use crate::error::AppError;
use crate::models::opportunity::{AssignmentRequest, DeliveryOpportunity};
use crate::models::order::{Order, ReleaseState};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/paid", post(order_paid))
        .route("/orders/:id/cancel", post(order_cancel))
        .route(
            "/orders/:id/opportunities",
            get(list_opportunities).post(open_opportunities),
        )
        .route("/orders/:id/random-assign", post(order_random_assign))
        .route("/orders/:id/assign", post(order_manual_assign))
        .route("/orders/:id/release/retry", post(order_release_retry))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(flatten)]
    pub order: NewOrder,
    #[serde(default)]
    pub paid: bool,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ManualAssignRequest {
    pub picker_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct AssignResponse {
    pub order_id: Uuid,
    pub created: usize,
    pub opportunities: Vec<DeliveryOpportunity>,
}

impl AssignResponse {
    fn new(order_id: Uuid, opportunities: Vec<DeliveryOpportunity>) -> Self {
        Self {
            order_id,
            created: opportunities.len(),
            opportunities,
        }
    }
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub order_id: Uuid,
    pub release_state: ReleaseState,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = place_order(&state, payload.order)?;
    if payload.paid {
        return Ok(Json(mark_paid(&state, order.id).await?));
    }
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    state
        .store
        .order(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
}

async fn order_paid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(mark_paid(&state, id).await?))
}

async fn order_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelOrderRequest>>,
) -> Result<Json<Order>, AppError> {
    let reason = payload
        .and_then(|Json(request)| request.reason)
        .filter(|reason| !reason.trim().is_empty());
    Ok(Json(cancel_order(&state, id, reason)?))
}

async fn list_opportunities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryOpportunity>>, AppError> {
    if state.store.order(id).is_none() {
        return Err(AppError::NotFound(format!("order {id} not found")));
    }
    Ok(Json(state.store.opportunities_for(id)))
}

async fn open_opportunities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignmentRequest>,
) -> Result<Json<AssignResponse>, AppError> {
    let opportunities = create_opportunities(&state, id, request)?;
    Ok(Json(AssignResponse::new(id, opportunities)))
}

async fn order_random_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssignResponse>, AppError> {
    let opportunities = random_assign(&state, id)?.into_iter().collect();
    Ok(Json(AssignResponse::new(id, opportunities)))
}

async fn order_manual_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualAssignRequest>,
) -> Result<Json<AssignResponse>, AppError> {
    let opportunities = manual_assign(&state, id, payload.picker_ids)?;
    Ok(Json(AssignResponse::new(id, opportunities)))
}

async fn order_release_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let release_state = retry_release(&state, id).await?;
    Ok(Json(ReleaseResponse {
        order_id: id,
        release_state,
    }))
}
