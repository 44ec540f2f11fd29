//! Owner-side invoice handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::OwnerContext;
use crate::models::{CreateInvoiceInput, Invoice, RecordPaymentInput, UpdateInvoiceInput};
use crate::startup::AppState;

pub async fn create_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Json(payload): Json<CreateInvoiceInput>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    let invoice = state.invoices.create(owner.owner_id, payload).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    owner: OwnerContext,
) -> Result<Json<Vec<Invoice>>, AppError> {
    Ok(Json(state.invoices.list(owner.owner_id).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(state.invoices.get(owner.owner_id, id).await?))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceInput>,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(state.invoices.update(owner.owner_id, id, payload).await?))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.invoices.delete(owner.owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(state.invoices.send(owner.owner_id, id).await?))
}

/// Offline payment entered by the owner.
pub async fn record_payment(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<RecordPaymentInput>,
) -> Result<Json<Invoice>, AppError> {
    tracing::info!(invoice_id = %id, amount = %payload.amount, "Recording owner payment");
    Ok(Json(
        state
            .invoices
            .record_payment(owner.owner_id, id, payload)
            .await?,
    ))
}
