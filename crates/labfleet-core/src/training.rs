//! One qualification step: run a training job and score it
//!
//! The job runner connects back to a local listening socket and streams
//! newline-delimited JSON session messages. Its verdict is cross-checked
//! against its exit code before being reported to the qualifier.

use std::net::Ipv4Addr;
use std::time::Duration;

use labfleet_api::JobStatus;
use labfleet_exec::{JobProcess, kill_and_reap, wait_with_timeout};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceCore, EXIT_TIMEOUT};
use crate::error::CoreError;
use crate::qualifier::{Preflight, TrainingTask};
use crate::runner::{JobCallback, JobRequest, SessionMessage};

/// How long the runner gets to connect back
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to keep reading after the runner exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolves once a stop was requested, or the stop sender is gone
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Run the qualifier's next task, if any, and report its outcome
///
/// The outcome is always reported, as `UNKNOWN` when the step failed, before
/// the error is returned.
///
/// # Errors
/// Returns the error that aborted the step.
pub(crate) async fn execute_step(
    core: &DeviceCore,
    stop: &mut watch::Receiver<bool>,
) -> Result<(), CoreError> {
    if *stop.borrow() {
        return Ok(());
    }

    let preflight = core.qualifier().preflight();
    if preflight != Preflight::Run {
        return Ok(());
    }

    let started = Instant::now();
    let outcome = run_task(core, stop).await;
    let status = match &outcome {
        Ok(status) => *status,
        Err(e) => {
            warn!(device = %core.id(), error = %e, "training step failed");
            JobStatus::Unknown
        }
    };

    info!(device = %core.id(), %status, elapsed = ?started.elapsed(), "training step finished");
    let reported = core.qualifier().report(status);
    if let Err(e) = reported {
        warn!(device = %core.id(), error = %e, "could not report the training outcome");
    }

    outcome.map(|_| ())
}

async fn run_task(
    core: &DeviceCore,
    stop: &mut watch::Receiver<bool>,
) -> Result<JobStatus, CoreError> {
    let task = core.qualifier().next_task()?;
    let training = &core.context().settings.training;
    let job_path = match task {
        TrainingTask::Registration => &training.registration_job,
        TrainingTask::BootLoop => &training.bootloop_job,
    };
    let raw_job = tokio::fs::read_to_string(job_path).await.map_err(|e| {
        CoreError::ConfigError(format!("cannot read job {}: {e}", job_path.display()))
    })?;

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .map_err(|e| CoreError::Exec(format!("cannot listen for the runner: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| CoreError::Exec(e.to_string()))?
        .port();

    let request = JobRequest::new(
        raw_job,
        JobCallback {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port,
        },
    );
    let mut process = core.start_job(&request, true).await?;
    info!(device = %core.id(), job_id = %request.job_id, ?task, "training job started");

    let stream = match tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()).await {
        Ok(Ok((stream, peer))) => {
            debug!(device = %core.id(), %peer, "runner connected back");
            stream
        }
        Ok(Err(e)) => {
            kill_and_reap(process.as_mut(), EXIT_TIMEOUT).await;
            return Err(CoreError::Transport(format!("accepting the runner failed: {e}")));
        }
        Err(_) => {
            kill_and_reap(process.as_mut(), EXIT_TIMEOUT).await;
            return Err(CoreError::Timeout(
                "the job runner never connected back".to_string(),
            ));
        }
    };
    drop(listener);

    let (reported, exited) = read_session(core.id(), stream, process.as_mut(), stop).await;

    let exit_code = match exited {
        Some(code) => code,
        None => match wait_with_timeout(process.as_mut(), EXIT_TIMEOUT).await {
            Ok(code) => code,
            Err(e) => {
                warn!(device = %core.id(), error = %e, "job runner did not exit, killing it");
                kill_and_reap(process.as_mut(), EXIT_TIMEOUT).await;
                return Err(CoreError::Timeout(
                    "the job runner did not exit after the session".to_string(),
                ));
            }
        },
    };

    let from_exit = match exit_code {
        Some(code) => {
            let status = JobStatus::from_code(code);
            if status == JobStatus::Unknown && code != JobStatus::Unknown.code() {
                error!(device = %core.id(), code, "job runner exited with an unknown code");
            }
            status
        }
        None => JobStatus::Unknown,
    };

    consolidate(reported, from_exit)
}

/// Combine the in-band verdict with the exit code
fn consolidate(reported: JobStatus, from_exit: JobStatus) -> Result<JobStatus, CoreError> {
    if reported != JobStatus::Unknown && from_exit != JobStatus::Unknown && reported != from_exit
    {
        return Err(CoreError::Consistency(format!(
            "the runner reported {reported} but exited with {from_exit}"
        )));
    }
    Ok(if reported == JobStatus::Unknown {
        from_exit
    } else {
        reported
    })
}

fn parse_session_line(device_id: &str, line: &str) -> Option<JobStatus> {
    match serde_json::from_str::<SessionMessage>(line) {
        Ok(SessionMessage::SessionEnd { status }) => Some(status),
        Ok(SessionMessage::Other) => None,
        Err(e) => {
            warn!(device = %device_id, error = %e, "unreadable session message");
            None
        }
    }
}

/// Read session messages until the session ends, a stop is requested, or
/// the runner exits
///
/// Returns the reported status and, when it was seen, the exit code.
async fn read_session(
    device_id: &str,
    stream: TcpStream,
    process: &mut dyn JobProcess,
    stop: &mut watch::Receiver<bool>,
) -> (JobStatus, Option<Option<i32>>) {
    let mut lines = BufReader::new(stream).lines();
    let mut reported = JobStatus::Unknown;
    let mut exited = None;
    let mut drain_deadline = Instant::now();

    loop {
        tokio::select! {
            biased;
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(status) = parse_session_line(device_id, &line) {
                        reported = status;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(device = %device_id, error = %e, "job session read failed");
                    break;
                }
            },
            () = stop_requested(stop) => {
                info!(device = %device_id, "stop requested, leaving the job session");
                break;
            }
            exit = process.wait(), if exited.is_none() => match exit {
                Ok(code) => {
                    exited = Some(code);
                    drain_deadline = Instant::now() + DRAIN_TIMEOUT;
                }
                Err(e) => {
                    warn!(device = %device_id, error = %e, "waiting for the job runner failed");
                    break;
                }
            },
            () = tokio::time::sleep_until(drain_deadline), if exited.is_some() => break,
        }
    }

    (reported, exited)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consolidate() {
        assert_eq!(
            consolidate(JobStatus::Pass, JobStatus::Unknown).unwrap(),
            JobStatus::Pass
        );
        assert_eq!(
            consolidate(JobStatus::Unknown, JobStatus::Fail).unwrap(),
            JobStatus::Fail
        );
        assert_eq!(
            consolidate(JobStatus::Warn, JobStatus::Warn).unwrap(),
            JobStatus::Warn
        );
        assert!(matches!(
            consolidate(JobStatus::Pass, JobStatus::Fail),
            Err(CoreError::Consistency(_))
        ));
    }

    #[test]
    fn test_session_line_parsing() {
        assert_eq!(
            parse_session_line("dev", r#"{"type": "session_end", "status": "PASS"}"#),
            Some(JobStatus::Pass)
        );
        assert_eq!(parse_session_line("dev", r#"{"type": "log"}"#), None);
        assert_eq!(parse_session_line("dev", "garbage"), None);
    }
}
