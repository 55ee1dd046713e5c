//! Error types for labfleet-power

use thiserror::Error;

use labfleet_exec::ExecError;

/// Errors that can occur while driving power ports
#[derive(Error, Debug, Clone)]
pub enum PowerError {
    /// The switch could not be reached or did not answer
    #[error("transport error: {0}")]
    Transport(String),

    /// The switch answered but refused the new state
    #[error("port {port_id} rejected state {state}")]
    Rejected {
        /// Port that refused the change
        port_id: String,
        /// Requested state
        state: String,
    },

    /// Port not present on the switch
    #[error("unknown port: {0}")]
    UnknownPort(String),

    /// No driver registered under this name
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// Driver configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Port is reserved and may not be changed
    #[error("port {0} is reserved")]
    Reserved(String),

    /// Local command execution failed
    #[error("execution error: {0}")]
    Exec(String),
}

impl PowerError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, PowerError::Transport(_))
    }
}

impl From<ExecError> for PowerError {
    fn from(err: ExecError) -> Self {
        if err.is_transient() {
            PowerError::Transport(err.to_string())
        } else {
            PowerError::Exec(err.to_string())
        }
    }
}
