use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::middleware::OwnerContext;
use crate::models::ReconciliationEntry;
use crate::startup::AppState;

/// Payments the processor may hold that are not (yet) on an invoice.
pub async fn list_reconciliations(
    State(state): State<AppState>,
    owner: OwnerContext,
) -> Result<Json<Vec<ReconciliationEntry>>, AppError> {
    Ok(Json(
        state
            .reconciliations
            .list_reconciliations(owner.owner_id)
            .await?,
    ))
}
