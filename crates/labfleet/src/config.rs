//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use labfleet_core::{BootDefaults, FleetSettings, TrainingSettings};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the labfleet daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Daemon server settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    /// Boot configuration served when no job runner provides one
    #[serde(default)]
    pub boot: BootDefaults,
    #[serde(default)]
    pub forge: ForgeSection,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Daemon server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Address and port to bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where the fleet lives and how job runners are started
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    /// The fleet document (PDUs, devices, forges)
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_farm_name")]
    pub farm_name: String,
    /// Per-device runner sockets and lock files
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    /// Job-runner executable
    #[serde(default = "default_runner_command")]
    pub runner_command: PathBuf,
    /// Arguments placed before the runner's `run-job` subcommand
    #[serde(default)]
    pub runner_args: Vec<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            farm_name: default_farm_name(),
            runtime_dir: default_runtime_dir(),
            runner_command: default_runner_command(),
            runner_args: Vec::new(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/labfleet/fleet.yml")
}

fn default_farm_name() -> String {
    "lab".to_string()
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/run/labfleet")
}

fn default_runner_command() -> PathBuf {
    PathBuf::from("labfleet-runner")
}

/// Device qualification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    /// Boot loops after registration; negative disables training
    #[serde(default = "default_boot_loop_count")]
    pub boot_loop_count: i32,
    /// Passing boot loops needed to qualify
    #[serde(default = "default_qualifying_rate")]
    pub qualifying_rate: u32,
    #[serde(default = "default_true")]
    pub quick_check: bool,
    #[serde(default = "default_registration_retry_delay")]
    pub registration_retry_delay_secs: u64,
    pub registration_job: Option<PathBuf>,
    pub bootloop_job: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            boot_loop_count: default_boot_loop_count(),
            qualifying_rate: default_qualifying_rate(),
            quick_check: true,
            registration_retry_delay_secs: default_registration_retry_delay(),
            registration_job: None,
            bootloop_job: None,
        }
    }
}

fn default_boot_loop_count() -> i32 {
    100
}

fn default_qualifying_rate() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_registration_retry_delay() -> u64 {
    120
}

impl TrainingConfig {
    fn to_settings(&self) -> TrainingSettings {
        let defaults = TrainingSettings::default();
        TrainingSettings {
            boot_loop_count: self.boot_loop_count,
            qualifying_rate: self.qualifying_rate,
            quick_check: self.quick_check,
            registration_retry_delay: Duration::from_secs(self.registration_retry_delay_secs),
            registration_job: self
                .registration_job
                .clone()
                .unwrap_or(defaults.registration_job),
            bootloop_job: self.bootloop_job.clone().unwrap_or(defaults.bootloop_job),
        }
    }
}

/// Forge integration settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgeSection {
    /// Where the generated runner configuration is written
    #[serde(default)]
    pub runner_config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be read or parsed
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("LABFLEET_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![
            PathBuf::from("labfleet.toml"),
            PathBuf::from("/etc/labfleet/labfleet.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("labfleet/labfleet.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        tracing::warn!("no config file found, using defaults");
        Ok(Config::default())
    }

    /// Settings shared with every actor
    #[must_use]
    pub fn fleet_settings(&self) -> FleetSettings {
        let mut settings = FleetSettings::new(&self.fleet.farm_name, &self.fleet.runtime_dir);
        settings.training = self.training.to_settings();
        settings.boot = self.boot.clone();
        settings.runner_config_path = self.forge.runner_config_path.clone();
        settings
    }
}
