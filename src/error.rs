use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedReason {
    AcceptedByOther,
    AlreadyAccepted,
    Expired,
    Cancelled,
}

impl ResolvedReason {
    pub fn message(&self) -> &'static str {
        match self {
            ResolvedReason::AcceptedByOther => "already accepted by another rider",
            ResolvedReason::AlreadyAccepted => "you have already accepted this delivery",
            ResolvedReason::Expired => "opportunity expired",
            ResolvedReason::Cancelled => "opportunity was cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionReason {
    InvalidCode,
    NotPickedUp,
    NotYetDelivered,
    OrderCancelled,
}

impl PreconditionReason {
    pub fn message(&self) -> &'static str {
        match self {
            PreconditionReason::InvalidCode => "invalid code",
            PreconditionReason::NotPickedUp => "order has not been picked up yet",
            PreconditionReason::NotYetDelivered => "order not yet delivered",
            PreconditionReason::OrderCancelled => "order was cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("opportunity expired")]
    Expired,

    #[error("{}", .0.message())]
    AlreadyResolved(ResolvedReason),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{}", .0.message())]
    PreconditionFailed(PreconditionReason),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code the front end branches on.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Expired => "expired",
            AppError::AlreadyResolved(reason) => match reason {
                ResolvedReason::AcceptedByOther => "accepted_by_other",
                ResolvedReason::AlreadyAccepted => "already_accepted",
                ResolvedReason::Expired => "expired",
                ResolvedReason::Cancelled => "cancelled",
            },
            AppError::InvalidState(_) => "invalid_state",
            AppError::PreconditionFailed(reason) => match reason {
                PreconditionReason::InvalidCode => "invalid_code",
                PreconditionReason::NotPickedUp => "not_picked_up",
                PreconditionReason::NotYetDelivered => "not_yet_delivered",
                PreconditionReason::OrderCancelled => "order_cancelled",
            },
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Expired => StatusCode::GONE,
            AppError::AlreadyResolved(ResolvedReason::Expired) => StatusCode::GONE,
            AppError::AlreadyResolved(_) => StatusCode::CONFLICT,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
