//! Discovery window endpoints

use std::sync::Arc;

use axum::{Json, extract::State};
use labfleet_api::requests::DiscoveryRequest;
use labfleet_api::responses::{DiscoveryStatus, MessageResponse};
use labfleet_core::{ArmDiscovery, CancelDiscovery, GetDiscovery};

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

/// The open discovery window, if any
#[utoipa::path(
    get,
    path = "/api/v1/dut/discover",
    responses((status = 200, body = Option<DiscoveryStatus>))
)]
pub async fn get_discovery(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<DiscoveryStatus>>, AppError> {
    Ok(Json(state.orchestrator.ask(GetDiscovery).await?))
}

/// Power a free port on and wait for the device behind it to register
#[utoipa::path(
    post,
    path = "/api/v1/dut/discover",
    request_body = DiscoveryRequest,
    responses(
        (status = 200, body = DiscoveryStatus),
        (status = 400, description = "The port is assigned to a device", body = ApiError),
        (status = 404, body = ApiError),
        (status = 409, description = "A window is already open, or the port is busy or reserved", body = ApiError)
    )
)]
pub async fn arm_discovery(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DiscoveryRequest>,
) -> Result<Json<DiscoveryStatus>, AppError> {
    Ok(Json(state.orchestrator.ask(ArmDiscovery { request }).await?))
}

/// Close the discovery window and power its port off
#[utoipa::path(
    delete,
    path = "/api/v1/dut/discover",
    responses((status = 200, body = MessageResponse), (status = 400, body = ApiError))
)]
pub async fn cancel_discovery(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, AppError> {
    state.orchestrator.ask(CancelDiscovery).await?;
    Ok(Json(MessageResponse::new("discovery cancelled")))
}
