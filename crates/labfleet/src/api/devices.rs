//! Device (DUT) management endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use labfleet_api::requests::{DevicePatchRequest, DeviceRegistrationRequest};
use labfleet_api::responses::{DeviceListResponse, DeviceStatus, MessageResponse};
use labfleet_core::{
    BootQuery, CancelDeviceJob, Discover, DiscoverOutcome, GetDevice, GetDeviceBootConfig,
    GetDeviceQuickCheck, ListDevices, PatchDevice, QueueDeviceQuickCheck, RemoveDevice,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

/// Whether a quick check is pending for a device
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuickCheckResponse {
    pub quick_check_queued: bool,
}

async fn device_status(state: &AppState, id: String) -> Result<DeviceStatus, AppError> {
    Ok(state.orchestrator.ask(GetDevice { id }).await?)
}

/// List every device with its current state
#[utoipa::path(
    get,
    path = "/api/v1/duts",
    responses((status = 200, body = DeviceListResponse))
)]
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DeviceListResponse>, AppError> {
    Ok(Json(state.orchestrator.ask(ListDevices).await?))
}

/// Register a device, or update the one with the same id
///
/// A device registering while a discovery window is open gets the window's
/// power port.
#[utoipa::path(
    post,
    path = "/api/v1/dut/",
    request_body = DeviceRegistrationRequest,
    responses(
        (status = 201, description = "Device created", body = DeviceStatus),
        (status = 200, description = "Device updated", body = DeviceStatus),
        (status = 400, body = ApiError)
    )
)]
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceRegistrationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .orchestrator
        .ask(Discover {
            update: req.into(),
            update_if_exists: true,
        })
        .await?;

    let code = match outcome {
        DiscoverOutcome::Created { .. } => StatusCode::CREATED,
        DiscoverOutcome::Updated { .. } | DiscoverOutcome::Ignored { .. } => StatusCode::OK,
    };
    let status = device_status(&state, outcome.id().to_string()).await?;
    Ok((code, Json(status)))
}

/// Get a device by id or full name
#[utoipa::path(
    get,
    path = "/api/v1/dut/{id}",
    params(("id" = String, Path, description = "Device id or full name")),
    responses((status = 200, body = DeviceStatus), (status = 404, body = ApiError))
)]
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceStatus>, AppError> {
    Ok(Json(device_status(&state, id).await?))
}

/// Change operator-editable fields of a device
#[utoipa::path(
    patch,
    path = "/api/v1/dut/{id}",
    params(("id" = String, Path, description = "Device id or full name")),
    request_body = DevicePatchRequest,
    responses(
        (status = 200, body = DeviceStatus),
        (status = 400, body = ApiError),
        (status = 404, body = ApiError)
    )
)]
pub async fn patch_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<DevicePatchRequest>,
) -> Result<Json<DeviceStatus>, AppError> {
    state
        .orchestrator
        .ask(PatchDevice {
            id: id.clone(),
            patch,
        })
        .await?;
    Ok(Json(device_status(&state, id).await?))
}

/// Remove a device and unregister its forge runners
#[utoipa::path(
    delete,
    path = "/api/v1/dut/{id}",
    params(("id" = String, Path, description = "Device id or full name")),
    responses((status = 200, body = MessageResponse), (status = 404, body = ApiError))
)]
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.orchestrator.ask(RemoveDevice { id: id.clone() }).await?;
    Ok(Json(MessageResponse::new(format!("device {id} removed"))))
}

#[utoipa::path(
    get,
    path = "/api/v1/dut/{id}/quick_check",
    params(("id" = String, Path, description = "Device id or full name")),
    responses((status = 200, body = QuickCheckResponse), (status = 404, body = ApiError))
)]
pub async fn get_quick_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QuickCheckResponse>, AppError> {
    let quick_check_queued = state.orchestrator.ask(GetDeviceQuickCheck { id }).await?;
    Ok(Json(QuickCheckResponse { quick_check_queued }))
}

/// Queue a single boot loop for a device
#[utoipa::path(
    post,
    path = "/api/v1/dut/{id}/quick_check",
    params(("id" = String, Path, description = "Device id or full name")),
    responses((status = 200, body = QuickCheckResponse), (status = 404, body = ApiError))
)]
pub async fn queue_quick_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QuickCheckResponse>, AppError> {
    state
        .orchestrator
        .ask(QueueDeviceQuickCheck { id: id.clone() })
        .await?;
    let quick_check_queued = state.orchestrator.ask(GetDeviceQuickCheck { id }).await?;
    Ok(Json(QuickCheckResponse { quick_check_queued }))
}

/// Cancel the job running on a device
#[utoipa::path(
    post,
    path = "/api/v1/dut/{id}/cancel_job",
    params(("id" = String, Path, description = "Device id or full name")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, description = "No job is running", body = ApiError),
        (status = 404, body = ApiError)
    )
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let cancelled = state
        .orchestrator
        .ask(CancelDeviceJob { id: id.clone() })
        .await?;
    let message = if cancelled {
        format!("the job on {id} was cancelled")
    } else {
        format!("the job on {id} could not be reached, it may already be gone")
    };
    Ok(Json(MessageResponse::new(message)))
}

/// Boot configuration for a device, as served to the boot service
#[utoipa::path(
    get,
    path = "/api/v1/dut/{id}/boot_config",
    params(
        ("id" = String, Path, description = "Device id or full name"),
        ("platform" = Option<String>, Query, description = "Platform reported by the firmware"),
        ("buildarch" = Option<String>, Query, description = "Architecture reported by the firmware"),
        ("bootloader" = Option<String>, Query, description = "Bootloader asking for the configuration")
    ),
    responses((status = 200, description = "Kernel, initrd and command line"), (status = 404, body = ApiError))
)]
pub async fn boot_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<BootQuery>,
) -> Result<impl IntoResponse, AppError> {
    let config = state
        .orchestrator
        .ask(GetDeviceBootConfig { id, query })
        .await?;
    Ok(Json(config))
}
