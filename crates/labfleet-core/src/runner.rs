//! Per-device job runner: control endpoint, payload and session protocol
//!
//! Every device has at most one job-runner process. While it lives it serves
//! a small HTTP API on a Unix socket and holds an flock on its lock file; when
//! neither answers, the device is idle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hyper::{Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use labfleet_api::requests::{JobSubmitRequest, JobTarget};
use labfleet_api::{DeviceState, JobStatus};
use labfleet_power::PortStats;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::boot::{BootConfig, BootQuery};
use crate::config::FleetDocument;
use crate::error::CoreError;
use crate::lock::{LockStatus, inspect_lock};

pub const STATE_PATH: &str = "/api/v1/state";
pub const CANCEL_PATH: &str = "/api/v1/job/cancel";
pub const BOOT_CONFIG_PATH: &str = "/api/v1/boot/config";

/// Version of the payload written to a runner's stdin
pub const PAYLOAD_VERSION: u32 = 1;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_CHECK_ATTEMPTS: u32 = 5;
const LOCK_CHECK_DELAY: Duration = Duration::from_millis(10);

/// Where a device's runner listens and locks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerPaths {
    pub socket: PathBuf,
    pub lock: PathBuf,
}

impl RunnerPaths {
    #[must_use]
    pub fn for_device(runtime_dir: &Path, device_id: &str) -> Self {
        let stem: String = device_id
            .chars()
            .map(|c| if c == '/' || c == ':' { '_' } else { c })
            .collect();
        Self {
            socket: runtime_dir.join(format!("{stem}.sock")),
            lock: runtime_dir.join(format!("{stem}.lock")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMethod {
    Get,
    Post,
}

/// Raw answer of a runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    /// Nothing is listening, or it did not answer in time
    #[error("runner unreachable: {0}")]
    Unreachable(String),

    #[error("runner protocol error: {0}")]
    Protocol(String),
}

/// HTTP control endpoint of one runner
#[async_trait]
pub trait RunnerEndpoint: Send + Sync {
    /// Send a bodiless request to `path_and_query`
    async fn request(
        &self,
        method: RunnerMethod,
        path_and_query: &str,
    ) -> Result<RunnerResponse, RunnerError>;
}

/// Creates the endpoint for a device's runner
pub trait RunnerConnector: Send + Sync {
    fn connect(&self, paths: &RunnerPaths) -> Arc<dyn RunnerEndpoint>;
}

/// Runner endpoint served over a Unix socket
pub struct UnixSocketEndpoint {
    socket_path: PathBuf,
    client: Client<UnixConnector>,
}

impl UnixSocketEndpoint {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client: Client::unix(),
        }
    }
}

#[async_trait]
impl RunnerEndpoint for UnixSocketEndpoint {
    async fn request(
        &self,
        method: RunnerMethod,
        path_and_query: &str,
    ) -> Result<RunnerResponse, RunnerError> {
        if !self.socket_path.exists() {
            return Err(RunnerError::Unreachable(format!(
                "{} does not exist",
                self.socket_path.display()
            )));
        }

        let uri: hyper::Uri = Uri::new(&self.socket_path, path_and_query).into();
        let method = match method {
            RunnerMethod::Get => Method::GET,
            RunnerMethod::Post => Method::POST,
        };
        debug!(socket = %self.socket_path.display(), %method, path = path_and_query, "runner request");

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json")
            .body(Body::empty())
            .map_err(|e| RunnerError::Protocol(e.to_string()))?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| RunnerError::Unreachable("request timed out".to_string()))?
            .map_err(|e| RunnerError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| RunnerError::Protocol(e.to_string()))?;

        Ok(RunnerResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Connects to runners over their Unix sockets
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSocketConnector;

impl RunnerConnector for UnixSocketConnector {
    fn connect(&self, paths: &RunnerPaths) -> Arc<dyn RunnerEndpoint> {
        Arc::new(UnixSocketEndpoint::new(paths.socket.clone()))
    }
}

#[derive(Deserialize)]
struct StateReply {
    state: String,
}

/// What the runner says about the device
///
/// A runner that cannot be reached is idle unless it still holds its lock,
/// in which case it is stuck.
pub async fn query_state(endpoint: &dyn RunnerEndpoint, lock_path: &Path) -> DeviceState {
    match endpoint.request(RunnerMethod::Get, STATE_PATH).await {
        Ok(response) if response.status == 200 => {
            match serde_json::from_slice::<StateReply>(&response.body) {
                Ok(reply) => reply.state.parse().unwrap_or(DeviceState::Unknown),
                Err(e) => {
                    warn!(error = %e, "runner sent an unreadable state");
                    DeviceState::Unknown
                }
            }
        }
        Ok(_) => DeviceState::Queued,
        Err(RunnerError::Protocol(e)) => {
            warn!(error = %e, "runner state query failed");
            DeviceState::Unknown
        }
        Err(RunnerError::Unreachable(_)) => {
            match inspect_lock(lock_path, LOCK_CHECK_ATTEMPTS, LOCK_CHECK_DELAY).await {
                LockStatus::Held => DeviceState::Borked,
                LockStatus::Missing | LockStatus::Free => DeviceState::Idle,
            }
        }
    }
}

/// Whether the runner answers at all
pub async fn is_listening(endpoint: &dyn RunnerEndpoint) -> bool {
    !matches!(
        endpoint.request(RunnerMethod::Get, STATE_PATH).await,
        Err(RunnerError::Unreachable(_))
    )
}

/// Ask the runner to cancel its job
///
/// Returns `true` when the runner accepted, or when there is no runner.
pub async fn cancel_job(endpoint: &dyn RunnerEndpoint) -> bool {
    match endpoint.request(RunnerMethod::Post, CANCEL_PATH).await {
        Ok(response) => response.status == 200,
        Err(RunnerError::Unreachable(_)) => true,
        Err(e) => {
            warn!(error = %e, "job cancellation failed");
            false
        }
    }
}

/// Boot configuration provided by the running job, if any
pub async fn fetch_boot_config(
    endpoint: &dyn RunnerEndpoint,
    query: &BootQuery,
) -> Option<BootConfig> {
    let params = {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in [
            ("platform", &query.platform),
            ("buildarch", &query.buildarch),
            ("bootloader", &query.bootloader),
        ] {
            if let Some(value) = value {
                params.append_pair(key, value);
            }
        }
        params.finish()
    };
    let path = if params.is_empty() {
        BOOT_CONFIG_PATH.to_string()
    } else {
        format!("{BOOT_CONFIG_PATH}?{params}")
    };

    match endpoint.request(RunnerMethod::Get, &path).await {
        Ok(response) if response.status == 200 => serde_json::from_slice(&response.body)
            .map_err(|e| warn!(error = %e, "runner sent an unreadable boot config"))
            .ok(),
        _ => None,
    }
}

/// Where the runner reports back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCallback {
    pub host: String,
    pub port: u16,
}

/// A job as handed to a runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub version: u32,
    pub job_id: String,
    /// Job description, forwarded verbatim
    pub raw_job: String,
    pub target: JobTarget,
    pub callback: JobCallback,
}

impl JobRequest {
    /// Build a request with a generated id
    #[must_use]
    pub fn new(raw_job: impl Into<String>, callback: JobCallback) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            job_id: untitled_job_id(),
            raw_job: raw_job.into(),
            target: JobTarget::default(),
            callback,
        }
    }

    /// Build from an API submission; the callback host defaults to `peer`
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` when no callback host is known.
    pub fn from_submission(
        submission: JobSubmitRequest,
        peer: Option<String>,
    ) -> Result<Self, CoreError> {
        let host = submission.callback.host.or(peer).ok_or_else(|| {
            CoreError::ConfigError("the callback host could not be determined".to_string())
        })?;

        Ok(Self {
            version: submission.version,
            job_id: submission.job_id.unwrap_or_else(untitled_job_id),
            raw_job: submission.job,
            target: submission.target,
            callback: JobCallback {
                host,
                port: submission.callback.port,
            },
        })
    }
}

fn untitled_job_id() -> String {
    format!("untitled-{}", Utc::now().format("%Y%m%d%H%M%S%6f"))
}

#[derive(Serialize)]
struct RunnerPayload<'a> {
    payload_version: u32,
    fleet: &'a FleetDocument,
    job_request: &'a JobRequest,
    device_id: &'a str,
    pdu_port_stats: &'a PortStats,
}

/// Everything a runner needs, as written to its stdin
///
/// # Errors
/// Returns `CoreError::Exec` when the payload cannot be serialized.
pub fn render_payload(
    fleet: &FleetDocument,
    job_request: &JobRequest,
    device_id: &str,
    pdu_port_stats: &PortStats,
) -> Result<String, CoreError> {
    let payload = RunnerPayload {
        payload_version: PAYLOAD_VERSION,
        fleet,
        job_request,
        device_id,
        pdu_port_stats,
    };
    serde_yaml::to_string(&payload).map_err(|e| CoreError::Exec(format!("payload: {e}")))
}

/// One newline-delimited JSON message on a job session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    SessionEnd { status: JobStatus },
    #[serde(other)]
    Other,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner endpoint shared by the crate's tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Answers from a queue, then keeps repeating the fallback
    pub(crate) struct ScriptedEndpoint {
        pub(crate) replies: Mutex<VecDeque<Result<RunnerResponse, RunnerError>>>,
        pub(crate) fallback: Mutex<Result<RunnerResponse, RunnerError>>,
        pub(crate) requests: Mutex<Vec<(RunnerMethod, String)>>,
    }

    impl ScriptedEndpoint {
        pub(crate) fn unreachable() -> Self {
            Self::always(Err(RunnerError::Unreachable("no socket".to_string())))
        }

        pub(crate) fn always(reply: Result<RunnerResponse, RunnerError>) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(reply),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn state(state: &str) -> Self {
            Self::always(Ok(RunnerResponse {
                status: 200,
                body: format!(r#"{{"state": "{state}"}}"#).into_bytes(),
            }))
        }

        pub(crate) fn set_fallback(&self, reply: Result<RunnerResponse, RunnerError>) {
            *self.fallback.lock().unwrap() = reply;
        }

        pub(crate) fn requests(&self) -> Vec<(RunnerMethod, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunnerEndpoint for ScriptedEndpoint {
        async fn request(
            &self,
            method: RunnerMethod,
            path_and_query: &str,
        ) -> Result<RunnerResponse, RunnerError> {
            self.requests
                .lock()
                .unwrap()
                .push((method, path_and_query.to_string()));
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedEndpoint;
    use super::*;
    use crate::lock::FileLock;

    fn reply(status: u16, body: &str) -> Result<RunnerResponse, RunnerError> {
        Ok(RunnerResponse {
            status,
            body: body.as_bytes().to_vec(),
        })
    }

    #[tokio::test]
    async fn test_state_reply_wins() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("dev.lock");

        let endpoint = ScriptedEndpoint::state("RUNNING");
        assert_eq!(query_state(&endpoint, &lock).await, DeviceState::Running);

        let endpoint = ScriptedEndpoint::state("DANCING");
        assert_eq!(query_state(&endpoint, &lock).await, DeviceState::Unknown);

        let endpoint = ScriptedEndpoint::always(reply(503, "busy"));
        assert_eq!(query_state(&endpoint, &lock).await, DeviceState::Queued);
    }

    #[tokio::test]
    async fn test_unreachable_runner_uses_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("dev.lock");
        let endpoint = ScriptedEndpoint::unreachable();

        assert_eq!(query_state(&endpoint, &lock).await, DeviceState::Idle);

        let held = FileLock::acquire(&lock, 1, Duration::from_millis(1))
            .unwrap()
            .unwrap();
        assert_eq!(query_state(&endpoint, &lock).await, DeviceState::Borked);

        drop(held);
        assert_eq!(query_state(&endpoint, &lock).await, DeviceState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_without_runner_succeeds() {
        assert!(cancel_job(&ScriptedEndpoint::unreachable()).await);
        assert!(cancel_job(&ScriptedEndpoint::always(reply(200, ""))).await);
        assert!(!cancel_job(&ScriptedEndpoint::always(reply(500, ""))).await);
    }

    #[tokio::test]
    async fn test_boot_config_query() {
        let endpoint = ScriptedEndpoint::always(reply(
            200,
            r#"{"kernel": "k", "initrd": "i", "cmdline": "console=ttyS0"}"#,
        ));
        let query = BootQuery {
            platform: Some("efi".to_string()),
            buildarch: Some("x86_64".to_string()),
            bootloader: None,
        };

        let config = fetch_boot_config(&endpoint, &query).await.unwrap();
        assert_eq!(config.cmdline, "console=ttyS0");
        assert_eq!(
            endpoint.requests()[0].1,
            "/api/v1/boot/config?platform=efi&buildarch=x86_64"
        );

        let missing = ScriptedEndpoint::always(reply(404, ""));
        assert!(fetch_boot_config(&missing, &query).await.is_none());
    }

    #[test]
    fn test_session_messages() {
        let end: SessionMessage =
            serde_json::from_str(r#"{"type": "session_end", "status": "FAIL"}"#).unwrap();
        assert_eq!(
            end,
            SessionMessage::SessionEnd {
                status: JobStatus::Fail
            }
        );

        let log: SessionMessage =
            serde_json::from_str(r#"{"type": "log", "line": "booting"}"#).unwrap();
        assert_eq!(log, SessionMessage::Other);
    }

    #[test]
    fn test_submission_callback_defaults_to_peer() {
        let submission: JobSubmitRequest =
            serde_json::from_str(r#"{"job": "tests: []", "callback": {"port": 4000}}"#).unwrap();

        let request = JobRequest::from_submission(submission.clone(), Some("10.0.0.9".into()))
            .unwrap();
        assert_eq!(request.callback.host, "10.0.0.9");
        assert!(request.job_id.starts_with("untitled-"));

        assert!(JobRequest::from_submission(submission, None).is_err());
    }

    #[test]
    fn test_runner_paths_are_flat() {
        let paths = RunnerPaths::for_device(Path::new("/run/labfleet"), "00:11:22:33:44:55");
        assert_eq!(paths.socket, Path::new("/run/labfleet/00_11_22_33_44_55.sock"));
        assert_eq!(paths.lock, Path::new("/run/labfleet/00_11_22_33_44_55.lock"));
    }
}
