//! Core error types for labfleet-core

use std::path::PathBuf;

use labfleet_api::QualifierState;
use labfleet_exec::ExecError;
use labfleet_power::PowerError;
use thiserror::Error;

/// Errors raised by the fleet store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The document on disk is not valid YAML or does not match the schema
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize the fleet document: {0}")]
    Serialize(String),

    /// A field holds a value the fleet cannot use
    #[error("invalid fleet document: {0}")]
    Invalid(String),

    /// Another process kept the store locked
    #[error("timed out trying to lock {0}")]
    LockTimeout(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Broad category of an error, used to pick an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request was invalid; nothing was changed
    InvalidInput,
    NotFound,
    /// The request conflicts with the current state of the fleet
    Conflict,
    /// A collaborator (power switch, job runner, forge) failed
    Transport,
    Timeout,
    Internal,
}

/// Errors that can occur in fleet operations
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Device, PDU, or port not found
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is invalid and nothing was mutated
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Power port is reserved
    #[error("reserved: {0}")]
    Reserved(String),

    /// The operation conflicts with the current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid qualifier state transition attempted
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: QualifierState,
        /// Attempted target state
        to: QualifierState,
    },

    /// Power switch or job runner could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// A process or connection did not show up in time
    #[error("timeout: {0}")]
    Timeout(String),

    /// A job runner contradicted itself
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Forge API error
    #[error("forge error: {0}")]
    Forge(String),

    /// Process execution error
    #[error("execution error: {0}")]
    Exec(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),
}

impl CoreError {
    #[must_use]
    pub fn status_class(&self) -> ErrorClass {
        match self {
            CoreError::NotFound(_) => ErrorClass::NotFound,
            CoreError::ConfigError(_) | CoreError::Store(StoreError::Invalid(_)) => {
                ErrorClass::InvalidInput
            }
            CoreError::Reserved(_) | CoreError::Conflict(_) | CoreError::InvalidTransition { .. } => {
                ErrorClass::Conflict
            }
            CoreError::Transport(_) | CoreError::Forge(_) => ErrorClass::Transport,
            CoreError::Timeout(_) => ErrorClass::Timeout,
            CoreError::Consistency(_)
            | CoreError::Exec(_)
            | CoreError::Store(_)
            | CoreError::ActorError(_) => ErrorClass::Internal,
        }
    }
}

impl From<PowerError> for CoreError {
    fn from(err: PowerError) -> Self {
        match err {
            PowerError::UnknownPort(port) => CoreError::NotFound(format!("port {port}")),
            PowerError::Reserved(port) => CoreError::Reserved(format!("port {port}")),
            PowerError::UnknownDriver(_) | PowerError::InvalidConfig(_) => {
                CoreError::ConfigError(err.to_string())
            }
            PowerError::Transport(_) | PowerError::Rejected { .. } | PowerError::Exec(_) => {
                CoreError::Transport(err.to_string())
            }
        }
    }
}

impl From<ExecError> for CoreError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout(_) => CoreError::Timeout(err.to_string()),
            _ => CoreError::Exec(err.to_string()),
        }
    }
}
