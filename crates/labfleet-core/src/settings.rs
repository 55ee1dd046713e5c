//! Runtime settings shared by every actor

use std::path::PathBuf;
use std::time::Duration;

use crate::boot::BootDefaults;

/// How devices are qualified before receiving jobs
#[derive(Debug, Clone)]
pub struct TrainingSettings {
    /// Boot loops after registration; negative disables training
    pub boot_loop_count: i32,
    /// Passing loops needed to qualify
    pub qualifying_rate: u32,
    /// Run a single boot loop when a device comes back from retirement
    pub quick_check: bool,
    /// How long a failed registration is shown before retrying
    pub registration_retry_delay: Duration,
    /// Job description used for self-registration
    pub registration_job: PathBuf,
    /// Job description used for each boot loop and the quick check
    pub bootloop_job: PathBuf,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            boot_loop_count: 100,
            qualifying_rate: 100,
            quick_check: true,
            registration_retry_delay: Duration::from_secs(120),
            registration_job: PathBuf::from("/etc/labfleet/jobs/register.yml.j2"),
            bootloop_job: PathBuf::from("/etc/labfleet/jobs/bootloop.yml.j2"),
        }
    }
}

/// Fleet-wide settings, fixed for the daemon's lifetime
#[derive(Debug, Clone)]
pub struct FleetSettings {
    /// Prefix of every device full name, and of the `farm:` tag
    pub farm_name: String,
    /// Where per-device runner sockets and lock files live
    pub runtime_dir: PathBuf,
    pub training: TrainingSettings,
    pub boot: BootDefaults,
    /// Where the forge runner configuration is written, if anywhere
    pub runner_config_path: Option<PathBuf>,
}

impl FleetSettings {
    #[must_use]
    pub fn new(farm_name: impl Into<String>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            farm_name: farm_name.into(),
            runtime_dir: runtime_dir.into(),
            training: TrainingSettings::default(),
            boot: BootDefaults::default(),
            runner_config_path: None,
        }
    }
}
