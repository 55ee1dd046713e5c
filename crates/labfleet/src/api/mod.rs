//! API route handlers

pub mod devices;
pub mod discovery;
pub mod error;
pub mod jobs;
pub mod pdus;
pub mod system;

use labfleet_api::requests::{
    CallbackRequest, DevicePatchRequest, DeviceRegistrationRequest, DiscoveryRequest,
    JobSubmitRequest, JobTarget, PortPatchRequest,
};
use labfleet_api::responses::{
    DeviceListResponse, DeviceStatus, DiscoveryStatus, FullStateResponse, HealthResponse,
    JobSubmitResponse, MessageResponse, PduAssignment, PduListResponse, PduSnapshot,
    PortSnapshot, TrainingStatus,
};
use labfleet_api::{DeviceState, PortState, QualifierState};
use utoipa::OpenApi;

pub use error::{ApiError, AppError};

/// OpenAPI description of the public API
#[derive(OpenApi)]
#[openapi(
    info(title = "labfleet", description = "Hardware CI fleet daemon"),
    paths(
        system::health,
        system::full_state,
        devices::list_devices,
        devices::register_device,
        devices::get_device,
        devices::patch_device,
        devices::delete_device,
        devices::get_quick_check,
        devices::queue_quick_check,
        devices::cancel_job,
        devices::boot_config,
        discovery::get_discovery,
        discovery::arm_discovery,
        discovery::cancel_discovery,
        pdus::list_pdus,
        pdus::get_pdu,
        pdus::get_port,
        pdus::patch_port,
        jobs::submit_job,
    ),
    components(schemas(
        ApiError,
        CallbackRequest,
        DeviceListResponse,
        DevicePatchRequest,
        DeviceRegistrationRequest,
        DeviceState,
        DeviceStatus,
        DiscoveryRequest,
        DiscoveryStatus,
        FullStateResponse,
        HealthResponse,
        JobSubmitRequest,
        JobSubmitResponse,
        JobTarget,
        MessageResponse,
        PduAssignment,
        PduListResponse,
        PduSnapshot,
        PortPatchRequest,
        PortSnapshot,
        PortState,
        QualifierState,
        TrainingStatus,
        devices::QuickCheckResponse,
    ))
)]
pub struct ApiDoc;
