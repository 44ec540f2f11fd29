use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::middleware::OwnerContext;
use crate::models::{DashboardSummary, Job};
use crate::startup::AppState;

pub async fn list_jobs(
    State(state): State<AppState>,
    owner: OwnerContext,
) -> Result<Json<Vec<Job>>, AppError> {
    Ok(Json(state.jobs.list(owner.owner_id).await?))
}

pub async fn dashboard(
    State(state): State<AppState>,
    owner: OwnerContext,
) -> Result<Json<DashboardSummary>, AppError> {
    Ok(Json(state.jobs.dashboard(owner.owner_id).await?))
}
