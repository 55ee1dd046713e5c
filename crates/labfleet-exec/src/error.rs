//! Failures of local commands and job-runner processes

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// The program could not be started
    #[error("cannot start {0}")]
    Spawn(String),

    /// Talking to, or waiting for, the process failed
    #[error("process I/O failed: {0}")]
    Io(String),

    /// The process outlived its deadline
    #[error("still running after {0:?}")]
    Timeout(Duration),
}

impl ExecError {
    /// Whether running the same command again may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecError::Io(_) | ExecError::Timeout(_))
    }
}
