//! Token-addressed routes for end clients.
//!
//! No owner session. Every error goes through [`DocumentError::into_public`],
//! so an unknown, malformed or unpublished token all render the same 404.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;

use crate::error::DocumentError;
use crate::models::{EstimateView, InvoiceView, RejectEstimateInput, SignEstimateInput};
use crate::services::gateway::{PayInvoiceInput, PaymentResult};
use crate::startup::AppState;

/// Unrouted paths, an empty token included, get the same body as an unknown token.
pub async fn not_found() -> AppError {
    DocumentError::NotFound("Document").into_public()
}

pub async fn view_estimate(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<EstimateView>, AppError> {
    let view = state
        .gateway
        .fetch_estimate(&token)
        .await
        .map_err(DocumentError::into_public)?;
    Ok(Json(view))
}

pub async fn sign_estimate(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SignEstimateInput>,
) -> Result<Json<EstimateView>, AppError> {
    let view = state
        .gateway
        .sign_estimate(&token, payload)
        .await
        .map_err(DocumentError::into_public)?;
    Ok(Json(view))
}

pub async fn reject_estimate(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Option<Json<RejectEstimateInput>>,
) -> Result<Json<EstimateView>, AppError> {
    let input = payload.map(|Json(input)| input).unwrap_or_default();
    let view = state
        .gateway
        .reject_estimate(&token, input)
        .await
        .map_err(DocumentError::into_public)?;
    Ok(Json(view))
}

pub async fn view_invoice(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<InvoiceView>, AppError> {
    let view = state
        .gateway
        .fetch_invoice(&token)
        .await
        .map_err(DocumentError::into_public)?;
    Ok(Json(view))
}

/// `200` with the updated invoice when recorded, `202` when the outcome is
/// pending reconciliation.
pub async fn pay_invoice(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<PayInvoiceInput>,
) -> Result<Response, AppError> {
    let result = state
        .gateway
        .pay_invoice(&token, payload)
        .await
        .map_err(DocumentError::into_public)?;

    Ok(match result {
        PaymentResult::Recorded(view) => (StatusCode::OK, Json(view)).into_response(),
        PaymentResult::Pending { reconciliation_id } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "pending",
                "reconciliation_id": reconciliation_id,
                "message": "Payment is being confirmed with the processor"
            })),
        )
            .into_response(),
    })
}
