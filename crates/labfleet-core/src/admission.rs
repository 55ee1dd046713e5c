//! Job admission: pick a device for a submitted job and start it there
//!
//! Submissions are serialized so two jobs can never be handed the same idle
//! device.

use std::collections::BTreeSet;

use kameo::actor::ActorRef;
use labfleet_api::DeviceState;
use labfleet_api::responses::JobSubmitResponse;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::actor::ask_error;
use crate::actor::orchestrator::FleetOrchestrator;
use crate::message::{DeviceCandidate, ListCandidates, StartJob};
use crate::runner::{JobRequest, PAYLOAD_VERSION};

/// Why no device could be picked, with the HTTP status to answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionError {
    pub status: u16,
    pub message: String,
}

impl AdmissionError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Outcome of a submission
#[derive(Debug, Clone)]
pub struct Admission {
    /// HTTP status to answer with
    pub status: u16,
    pub response: JobSubmitResponse,
}

impl Admission {
    fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            response: JobSubmitResponse {
                version: PAYLOAD_VERSION,
                device: None,
                error_msg: Some(message.into()),
            },
        }
    }
}

fn has_tags(candidate: &DeviceCandidate, wanted: &BTreeSet<&str>) -> bool {
    let tags: BTreeSet<&str> = candidate.all_tags.iter().map(String::as_str).collect();
    wanted.is_subset(&tags)
}

/// Pick the device a job should go to
///
/// A target id (or full name) must exist (404), carry the wanted tags (406),
/// be idle and not retired (409). Without an id, the first idle non-retired
/// device with the wanted tags wins; 409 when all of them are busy, 406 when
/// there are none.
///
/// # Errors
/// Returns the status and reason when no device fits.
pub fn select_target(
    target_id: Option<&str>,
    tags: &[String],
    candidates: &[DeviceCandidate],
) -> Result<usize, AdmissionError> {
    let wanted: BTreeSet<&str> = tags.iter().map(String::as_str).collect();

    if let Some(target) = target_id {
        let index = candidates
            .iter()
            .position(|c| c.id == target)
            .or_else(|| candidates.iter().position(|c| c.full_name == target))
            .ok_or_else(|| AdmissionError::new(404, format!("unknown device {target}")))?;
        let candidate = &candidates[index];

        if !has_tags(candidate, &wanted) {
            return Err(AdmissionError::new(
                406,
                format!(
                    "device {target} does not match the tags (asked: {wanted:?}, actual: {:?})",
                    candidate.all_tags
                ),
            ));
        }
        if candidate.state != DeviceState::Idle {
            return Err(AdmissionError::new(
                409,
                format!(
                    "device {target} is unavailable, current state is {}",
                    candidate.state
                ),
            ));
        }
        if candidate.is_retired {
            return Err(AdmissionError::new(409, format!("device {target} is retired")));
        }
        return Ok(index);
    }

    let mut found_candidate = false;
    for (index, candidate) in candidates.iter().enumerate() {
        if !has_tags(candidate, &wanted) || candidate.is_retired {
            continue;
        }
        found_candidate = true;
        if candidate.state == DeviceState::Idle {
            return Ok(index);
        }
    }

    if found_candidate {
        Err(AdmissionError::new(
            409,
            format!("all devices matching the tags {wanted:?} are busy"),
        ))
    } else {
        Err(AdmissionError::new(
            406,
            format!("no active device found matching the tags {wanted:?}"),
        ))
    }
}

/// Serializes job submissions
#[derive(Debug, Default)]
pub struct JobAdmission {
    lock: Mutex<()>,
}

impl JobAdmission {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a device for `request` and start the job on it
    pub async fn submit(
        &self,
        orchestrator: &ActorRef<FleetOrchestrator>,
        request: JobRequest,
    ) -> Admission {
        let _admission = self.lock.lock().await;

        let candidates = match orchestrator.ask(ListCandidates).await.map_err(ask_error) {
            Ok(candidates) => candidates,
            Err(e) => return Admission::rejected(500, e.to_string()),
        };

        let devices: Vec<DeviceCandidate> =
            candidates.iter().map(|(device, _)| device.clone()).collect();
        let index = match select_target(
            request.target.id.as_deref(),
            &request.target.tags,
            &devices,
        ) {
            Ok(index) => index,
            Err(e) => {
                info!(job_id = %request.job_id, status = e.status, reason = %e.message, "job rejected");
                return Admission::rejected(e.status, e.message);
            }
        };
        let (device, actor_ref) = &candidates[index];
        let job_id = request.job_id.clone();

        match actor_ref.ask(StartJob { request }).await.map_err(ask_error) {
            Ok(pid) => {
                info!(device = %device.id, %job_id, ?pid, "job started");
                Admission {
                    status: 200,
                    response: JobSubmitResponse {
                        version: PAYLOAD_VERSION,
                        device: Some(device.id.clone()),
                        error_msg: None,
                    },
                }
            }
            Err(e) => {
                warn!(device = %device.id, %job_id, error = %e, "job failed to start");
                Admission::rejected(500, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, tags: &[&str], state: DeviceState, is_retired: bool) -> DeviceCandidate {
        DeviceCandidate {
            id: id.to_string(),
            full_name: format!("lab-{id}-1"),
            all_tags: tags.iter().map(ToString::to_string).collect(),
            is_retired,
            state,
        }
    }

    fn tags(tags: &[&str]) -> Vec<String> {
        tags.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_target_by_id() {
        let fleet = vec![
            candidate("a", &["gpu:amd"], DeviceState::Idle, false),
            candidate("b", &["gpu:intel"], DeviceState::Running, false),
            candidate("c", &["gpu:amd"], DeviceState::Idle, true),
        ];

        assert_eq!(select_target(Some("a"), &tags(&["gpu:amd"]), &fleet), Ok(0));
        assert_eq!(select_target(Some("lab-a-1"), &[], &fleet), Ok(0));
        assert_eq!(select_target(Some("zz"), &[], &fleet).unwrap_err().status, 404);
        assert_eq!(
            select_target(Some("a"), &tags(&["gpu:intel"]), &fleet)
                .unwrap_err()
                .status,
            406
        );
        assert_eq!(select_target(Some("b"), &[], &fleet).unwrap_err().status, 409);
        assert_eq!(select_target(Some("c"), &[], &fleet).unwrap_err().status, 409);
    }

    #[test]
    fn test_target_by_tags() {
        let fleet = vec![
            candidate("a", &["gpu:amd"], DeviceState::Running, false),
            candidate("b", &["gpu:amd"], DeviceState::Idle, true),
            candidate("c", &["gpu:amd", "big"], DeviceState::Idle, false),
        ];

        assert_eq!(select_target(None, &tags(&["gpu:amd"]), &fleet), Ok(2));
        assert_eq!(
            select_target(None, &tags(&["gpu:amd", "small"]), &fleet)
                .unwrap_err()
                .status,
            406
        );

        let busy = vec![candidate("a", &["gpu:amd"], DeviceState::Training, false)];
        assert_eq!(
            select_target(None, &tags(&["gpu:amd"]), &busy)
                .unwrap_err()
                .status,
            409
        );
    }
}
