//! State enums shared by the daemon and its clients

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Error returned when a state name cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind} '{value}'")]
pub struct ParseStateError {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

/// State of a single power outlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortState {
    Unknown,
    Off,
    On,
    Reboot,
}

impl PortState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PortState::Unknown => "UNKNOWN",
            PortState::Off => "OFF",
            PortState::On => "ON",
            PortState::Reboot => "REBOOT",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(PortState::Unknown),
            "OFF" => Ok(PortState::Off),
            "ON" => Ok(PortState::On),
            "REBOOT" => Ok(PortState::Reboot),
            _ => Err(ParseStateError {
                kind: "port state",
                value: s.to_string(),
            }),
        }
    }
}

/// Externally-visible state of a device under test
///
/// Computed on every poll from the job runner, the persisted device flags,
/// and the qualifier; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    WaitForConfig,
    Idle,
    Training,
    Queued,
    Running,
    Retired,
    Unknown,
    QuickCheck,
    Borked,
}

impl DeviceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::WaitForConfig => "WAIT_FOR_CONFIG",
            DeviceState::Idle => "IDLE",
            DeviceState::Training => "TRAINING",
            DeviceState::Queued => "QUEUED",
            DeviceState::Running => "RUNNING",
            DeviceState::Retired => "RETIRED",
            DeviceState::Unknown => "UNKNOWN",
            DeviceState::QuickCheck => "QUICK_CHECK",
            DeviceState::Borked => "BORKED",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "WAIT_FOR_CONFIG" => DeviceState::WaitForConfig,
            "IDLE" => DeviceState::Idle,
            "TRAINING" => DeviceState::Training,
            "QUEUED" => DeviceState::Queued,
            "RUNNING" => DeviceState::Running,
            "RETIRED" => DeviceState::Retired,
            "UNKNOWN" => DeviceState::Unknown,
            "QUICK_CHECK" => DeviceState::QuickCheck,
            "BORKED" => DeviceState::Borked,
            _ => {
                return Err(ParseStateError {
                    kind: "device state",
                    value: s.to_string(),
                });
            }
        };
        Ok(state)
    }
}

/// Externally-visible qualifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualifierState {
    Idle,
    Enrolling,
    QuickCheck,
    /// Enrolling, but waiting out the registration retry delay
    RegistrationFailed,
}

impl fmt::Display for QualifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualifierState::Idle => "IDLE",
            QualifierState::Enrolling => "ENROLLING",
            QualifierState::QuickCheck => "QUICK_CHECK",
            QualifierState::RegistrationFailed => "REGISTRATION_FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of a job, also used as the job runner's process exit code
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pass,
    Warn,
    Complete,
    Fail,
    Incomplete,
    Unknown,
    SetupFail,
}

impl JobStatus {
    /// Map a runner exit code to a status; unknown codes map to `Unknown`
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => JobStatus::Pass,
            1 => JobStatus::Warn,
            2 => JobStatus::Complete,
            3 => JobStatus::Fail,
            4 => JobStatus::Incomplete,
            6 => JobStatus::SetupFail,
            _ => JobStatus::Unknown,
        }
    }

    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            JobStatus::Pass => 0,
            JobStatus::Warn => 1,
            JobStatus::Complete => 2,
            JobStatus::Fail => 3,
            JobStatus::Incomplete => 4,
            JobStatus::Unknown => 5,
            JobStatus::SetupFail => 6,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pass => "PASS",
            JobStatus::Warn => "WARN",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Fail => "FAIL",
            JobStatus::Incomplete => "INCOMPLETE",
            JobStatus::Unknown => "UNKNOWN",
            JobStatus::SetupFail => "SETUP_FAIL",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_state_parse_is_case_insensitive() {
        assert_eq!("on".parse::<PortState>(), Ok(PortState::On));
        assert_eq!(" Off ".parse::<PortState>(), Ok(PortState::Off));
        assert!("blink".parse::<PortState>().is_err());
    }

    #[test]
    fn test_device_state_names_match_serde() {
        for state in [
            DeviceState::WaitForConfig,
            DeviceState::QuickCheck,
            DeviceState::Borked,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(state.as_str().parse::<DeviceState>(), Ok(state));
        }
    }

    #[test]
    fn test_job_status_exit_codes() {
        assert_eq!(JobStatus::from_code(0), JobStatus::Pass);
        assert_eq!(JobStatus::from_code(3), JobStatus::Fail);
        assert_eq!(JobStatus::from_code(42), JobStatus::Unknown);
        assert_eq!(JobStatus::from_code(-1), JobStatus::Unknown);
        assert_eq!(JobStatus::from_code(JobStatus::SetupFail.code()), JobStatus::SetupFail);
    }
}
