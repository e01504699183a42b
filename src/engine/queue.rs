use uuid::Uuid;

use crate::error::AppError;
use crate::models::opportunity::AssignmentRequest;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AssignmentJob {
    pub order_id: Uuid,
    pub request: AssignmentRequest,
}

pub async fn enqueue_assignment(state: &AppState, job: AssignmentJob) -> Result<(), AppError> {
    state
        .assignment_tx
        .send(job)
        .await
        .map_err(|err| AppError::Internal(format!("assignment queue send failed: {err}")))?;

    state.metrics.assignment_queue_depth.inc();
    Ok(())
}
