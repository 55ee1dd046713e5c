//! Short-lived shell commands, as used by command-driven power switches

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::ExecError;

/// What a finished command printed, and how it exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when killed by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }

    /// Both streams, stderr last, for error messages
    #[must_use]
    pub fn transcript(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Runs one command line to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd`, killing it once `timeout` elapsed
    async fn run(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExecError>;
}

/// Runs command lines through a POSIX shell on this host
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    #[instrument(skip(self), level = "debug")]
    async fn run(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExecError> {
        // Dropping the child on timeout kills it
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", self.shell)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout(timeout))?
            .map_err(|e| ExecError::Io(e.to_string()))?;

        let output = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if output.succeeded() {
            debug!(command = %cmd, "command succeeded");
        } else {
            warn!(command = %cmd, code = output.code, stderr = %output.stderr.trim(), "command failed");
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_switch_status_is_read_from_stdout() {
        let output = ShellRunner::new().run("printf 'ON\\n'", LIMIT).await.unwrap();
        assert!(output.succeeded());
        assert_eq!(output.stdout, "ON\n");
    }

    #[tokio::test]
    async fn test_failed_command_keeps_its_diagnostics() {
        let output = ShellRunner::new()
            .run("echo outlet 3; echo 'snmp: no response' >&2; exit 2", LIMIT)
            .await
            .unwrap();
        assert_eq!(output.code, 2);
        assert_eq!(output.transcript(), "outlet 3\nsnmp: no response");
    }

    #[tokio::test]
    async fn test_hung_command_is_a_transient_timeout() {
        let err = ShellRunner::new()
            .run("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout(_)));
        assert!(err.is_transient());
    }
}
