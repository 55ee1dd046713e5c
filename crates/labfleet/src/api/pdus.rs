//! Power switch endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use labfleet_api::requests::PortPatchRequest;
use labfleet_api::responses::{PduListResponse, PduSnapshot, PortSnapshot};
use labfleet_core::{GetPdu, GetPort, ListPdus, PatchPort};

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/v1/pdus",
    responses((status = 200, body = PduListResponse))
)]
pub async fn list_pdus(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PduListResponse>, AppError> {
    Ok(Json(state.orchestrator.ask(ListPdus).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/pdu/{name}",
    params(("name" = String, Path, description = "PDU name")),
    responses((status = 200, body = PduSnapshot), (status = 404, body = ApiError))
)]
pub async fn get_pdu(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<PduSnapshot>, AppError> {
    Ok(Json(state.orchestrator.ask(GetPdu { name }).await?))
}

/// Poll a port and return what is known about it
#[utoipa::path(
    get,
    path = "/api/v1/pdu/{name}/port/{port_id}",
    params(
        ("name" = String, Path, description = "PDU name"),
        ("port_id" = String, Path, description = "Port identifier")
    ),
    responses((status = 200, body = PortSnapshot), (status = 404, body = ApiError))
)]
pub async fn get_port(
    State(state): State<Arc<AppState>>,
    Path((pdu, port_id)): Path<(String, String)>,
) -> Result<Json<PortSnapshot>, AppError> {
    Ok(Json(state.orchestrator.ask(GetPort { pdu, port_id }).await?))
}

/// Switch a port, or change its reservation
#[utoipa::path(
    patch,
    path = "/api/v1/pdu/{name}/port/{port_id}",
    params(
        ("name" = String, Path, description = "PDU name"),
        ("port_id" = String, Path, description = "Port identifier")
    ),
    request_body = PortPatchRequest,
    responses(
        (status = 200, body = PortSnapshot),
        (status = 400, description = "Invalid state, or the port is in use", body = ApiError),
        (status = 404, body = ApiError),
        (status = 409, description = "The port is reserved", body = ApiError)
    )
)]
pub async fn patch_port(
    State(state): State<Arc<AppState>>,
    Path((pdu, port_id)): Path<(String, String)>,
    Json(patch): Json<PortPatchRequest>,
) -> Result<Json<PortSnapshot>, AppError> {
    Ok(Json(
        state
            .orchestrator
            .ask(PatchPort {
                pdu,
                port_id,
                patch,
            })
            .await?,
    ))
}
