//! Job-runner process launching
//!
//! A job runner is a separate process per device. It receives its full job
//! description on stdin, serves a control endpoint on a Unix socket, and exits
//! with the job's status code.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::ExecError;

/// Everything needed to start one job runner
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub device_id: String,
    /// Control endpoint the runner must serve
    pub socket_path: PathBuf,
    /// Run-lock the runner must hold while alive
    pub lock_path: PathBuf,
    /// Serialized job description written to stdin
    pub payload: String,
    /// Discard the runner's stdout/stderr
    pub quiet: bool,
}

/// Handle on a running job-runner process
#[async_trait]
pub trait JobProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit; `None` when it was killed by a signal
    ///
    /// Must be cancel-safe so it can be raced against other events.
    async fn wait(&mut self) -> Result<Option<i32>, ExecError>;

    /// Ask the process to die without waiting for it
    fn start_kill(&mut self) -> Result<(), ExecError>;
}

/// Spawns job-runner processes
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn JobProcess>, ExecError>;
}

/// Wait for a process, failing with `ExecError::Timeout` after `limit`
///
/// # Errors
/// Returns the wait error, or a timeout error if the process is still alive.
pub async fn wait_with_timeout(
    process: &mut dyn JobProcess,
    limit: Duration,
) -> Result<Option<i32>, ExecError> {
    tokio::time::timeout(limit, process.wait())
        .await
        .map_err(|_| ExecError::Timeout(limit))?
}

/// Kill a process and reap it, giving up after `limit`
pub async fn kill_and_reap(process: &mut dyn JobProcess, limit: Duration) {
    if let Err(e) = process.start_kill() {
        warn!(pid = ?process.pid(), error = %e, "failed to kill job runner");
    }
    if let Err(e) = wait_with_timeout(process, limit).await {
        warn!(pid = ?process.pid(), error = %e, "job runner did not die after being killed");
    }
}

/// A job runner backed by a real child process
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl JobProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<Option<i32>, ExecError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;
        Ok(status.code())
    }

    fn start_kill(&mut self) -> Result<(), ExecError> {
        self.child
            .start_kill()
            .map_err(|e| ExecError::Io(e.to_string()))
    }
}

/// Launches `<program> [args...] run-job -s <socket> -l <lock>`
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments inserted before the `run-job` subcommand
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("run-job")
            .arg("-s")
            .arg(&spec.socket_path)
            .arg("-l")
            .arg(&spec.lock_path)
            .stdin(Stdio::piped());

        if spec.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        cmd
    }
}

#[async_trait]
impl JobLauncher for CommandLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn JobProcess>, ExecError> {
        let mut child = self
            .command(&spec)
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", self.program.display())))?;

        debug!(device = %spec.device_id, pid = ?child.id(), "job runner spawned");

        let Some(mut stdin) = child.stdin.take() else {
            let mut process = ChildProcess::new(child);
            kill_and_reap(&mut process, Duration::from_secs(10)).await;
            return Err(ExecError::Io("job runner has no stdin".to_string()));
        };

        let written = async {
            stdin.write_all(spec.payload.as_bytes()).await?;
            stdin.flush().await?;
            stdin.shutdown().await
        }
        .await;

        // Closing stdin signals the end of the job description
        drop(stdin);

        let mut process = ChildProcess::new(child);
        if let Err(e) = written {
            kill_and_reap(&mut process, Duration::from_secs(10)).await;
            return Err(ExecError::Io(format!(
                "failed to send the job description: {e}"
            )));
        }

        info!(device = %spec.device_id, pid = ?process.pid(), "job runner started");
        Ok(Box::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(payload: &str) -> LaunchSpec {
        LaunchSpec {
            device_id: "00:11:22:33:44:55".to_string(),
            socket_path: PathBuf::from("/tmp/labfleet-test.sock"),
            lock_path: PathBuf::from("/tmp/labfleet-test.sock.lock"),
            payload: payload.to_string(),
            quiet: true,
        }
    }

    #[tokio::test]
    async fn test_launch_exit_code_is_reported() {
        // `sh -c '...' run-job -s <sock> -l <lock>`: extra args land in $0..$4
        let launcher = CommandLauncher::new("sh").with_args(vec![
            "-c".to_string(),
            "cat >/dev/null; exit 3".to_string(),
        ]);

        let mut process = launcher.launch(spec("job: {}\n")).await.unwrap();
        let code = wait_with_timeout(process.as_mut(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_wait_times_out_then_kill() {
        let launcher = CommandLauncher::new("sh")
            .with_args(vec!["-c".to_string(), "sleep 30".to_string()]);

        let mut process = launcher.launch(spec("")).await.unwrap();
        let err = wait_with_timeout(process.as_mut(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout(_)));

        kill_and_reap(process.as_mut(), Duration::from_secs(5)).await;
        assert_eq!(process.wait().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let launcher = CommandLauncher::new("/nonexistent/labfleet-runner");
        let err = launcher.launch(spec("")).await.err().unwrap();
        assert!(matches!(err, ExecError::Spawn(_)));
    }
}
