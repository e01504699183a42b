use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::delivery::{confirm_receipt, receipt_status, ReceiptConfirmation, ReceiptStatusView};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/customer/confirm-order/", post(confirm_order))
        .route("/customer/confirm-order/:code/", get(get_confirm_order))
}

#[derive(Deserialize)]
pub struct ConfirmOrderRequest {
    pub customer_confirmation_code: String,
}

async fn confirm_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmOrderRequest>,
) -> Result<Json<ReceiptConfirmation>, AppError> {
    Ok(Json(
        confirm_receipt(&state, payload.customer_confirmation_code.trim()).await?,
    ))
}

async fn get_confirm_order(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ReceiptStatusView>, AppError> {
    Ok(Json(receipt_status(&state, &code)?))
}
