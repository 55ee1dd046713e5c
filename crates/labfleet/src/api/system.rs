//! Health and whole-fleet endpoints

use std::sync::Arc;

use axum::{Json, extract::State};
use labfleet_api::responses::{FullStateResponse, HealthResponse};
use labfleet_core::FullState;

use crate::api::error::AppError;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Every PDU, every device and the discovery window in one document
#[utoipa::path(
    get,
    path = "/api/v1/full-state",
    responses((status = 200, body = FullStateResponse))
)]
pub async fn full_state(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FullStateResponse>, AppError> {
    Ok(Json(state.orchestrator.ask(FullState).await?))
}
