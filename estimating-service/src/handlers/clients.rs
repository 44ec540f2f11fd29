use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::OwnerContext;
use crate::models::{Client, CreateClientInput, UpdateClientInput};
use crate::startup::AppState;

pub async fn create_client(
    State(state): State<AppState>,
    owner: OwnerContext,
    Json(payload): Json<CreateClientInput>,
) -> Result<(StatusCode, Json<Client>), AppError> {
    let client = state.clients.create(owner.owner_id, payload).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn list_clients(
    State(state): State<AppState>,
    owner: OwnerContext,
) -> Result<Json<Vec<Client>>, AppError> {
    Ok(Json(state.clients.list(owner.owner_id).await?))
}

pub async fn get_client(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Client>, AppError> {
    Ok(Json(state.clients.get(owner.owner_id, id).await?))
}

pub async fn update_client(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateClientInput>,
) -> Result<Json<Client>, AppError> {
    Ok(Json(state.clients.update(owner.owner_id, id, payload).await?))
}

pub async fn delete_client(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.clients.delete(owner.owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
