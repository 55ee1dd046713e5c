//! Job submission endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::StatusCode,
};
use labfleet_api::requests::JobSubmitRequest;
use labfleet_api::responses::JobSubmitResponse;
use labfleet_core::JobRequest;
use labfleet_core::runner::PAYLOAD_VERSION;
use tracing::info;

use crate::state::AppState;

/// Pick a device for a job and start it there
///
/// The callback host defaults to the submitter's address.
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body = JobSubmitRequest,
    responses(
        (status = 200, description = "The job was dispatched", body = JobSubmitResponse),
        (status = 400, description = "Invalid submission", body = JobSubmitResponse),
        (status = 404, description = "Unknown target device", body = JobSubmitResponse),
        (status = 406, description = "No device carries the wanted tags", body = JobSubmitResponse),
        (status = 409, description = "Every matching device is busy", body = JobSubmitResponse),
        (status = 500, description = "The job failed to start", body = JobSubmitResponse)
    )
)]
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(submission): Json<JobSubmitRequest>,
) -> (StatusCode, Json<JobSubmitResponse>) {
    let request = match JobRequest::from_submission(submission, Some(peer.ip().to_string())) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(JobSubmitResponse {
                    version: PAYLOAD_VERSION,
                    device: None,
                    error_msg: Some(e.to_string()),
                }),
            );
        }
    };
    info!(job_id = %request.job_id, %peer, target = ?request.target, "job submitted");

    let admission = state.admission.submit(&state.orchestrator, request).await;
    let status =
        StatusCode::from_u16(admission.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(admission.response))
}
