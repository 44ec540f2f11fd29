//! Owner-side estimate handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::OwnerContext;
use crate::models::{
    ConvertEstimateInput, CreateEstimateInput, Estimate, Invoice, UpdateEstimateInput,
};
use crate::startup::AppState;

pub async fn create_estimate(
    State(state): State<AppState>,
    owner: OwnerContext,
    Json(payload): Json<CreateEstimateInput>,
) -> Result<(StatusCode, Json<Estimate>), AppError> {
    let estimate = state.estimates.create(owner.owner_id, payload).await?;
    Ok((StatusCode::CREATED, Json(estimate)))
}

pub async fn list_estimates(
    State(state): State<AppState>,
    owner: OwnerContext,
) -> Result<Json<Vec<Estimate>>, AppError> {
    Ok(Json(state.estimates.list(owner.owner_id).await?))
}

pub async fn get_estimate(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Estimate>, AppError> {
    Ok(Json(state.estimates.get(owner.owner_id, id).await?))
}

pub async fn update_estimate(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateEstimateInput>,
) -> Result<Json<Estimate>, AppError> {
    Ok(Json(state.estimates.update(owner.owner_id, id, payload).await?))
}

pub async fn delete_estimate(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.estimates.delete(owner.owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Mark sent and email the client their link.
pub async fn send_estimate(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Estimate>, AppError> {
    Ok(Json(state.estimates.send(owner.owner_id, id).await?))
}

/// Snapshot an approved estimate into a new invoice.
pub async fn convert_estimate(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
    payload: Option<Json<ConvertEstimateInput>>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    let input = payload.map(|Json(input)| input).unwrap_or_default();
    let invoice = state.invoices.convert(owner.owner_id, id, input).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}
