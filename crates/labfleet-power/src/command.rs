//! Power switch driven through shell commands
//!
//! Each operation is a command template where `{port}` is replaced by the
//! shell-quoted port id, e.g. `snmpset -v1 -c private pdu1 ...{port} i 1`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use labfleet_api::PortState;
use labfleet_exec::{CommandOutput, CommandRunner, ShellRunner};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::PowerError;
use crate::traits::PduDriver;
use crate::types::{DEFAULT_MIN_OFF_TIME, PortInfo};

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Configuration accepted by the `command` driver
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandDriverConfig {
    /// Port ids exposed by the switch
    pub ports: Vec<String>,
    /// Powers a port on
    pub on: String,
    /// Powers a port off
    pub off: String,
    /// Power-cycles a port; unsupported when absent
    #[serde(default)]
    pub reboot: Option<String>,
    /// Prints `ON` or `OFF` for a port
    pub status: String,
    /// Extra attempts after a retryable failure
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Per-command timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Default minimum off time in seconds
    #[serde(default)]
    pub min_off_time: Option<f64>,
}

fn default_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    10
}

/// Quote a value for safe interpolation into a POSIX shell command
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command-template power switch
pub struct CommandDriver {
    config: CommandDriverConfig,
    min_off_time: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl CommandDriver {
    /// Create a driver running commands through the local shell
    ///
    /// # Errors
    /// Returns `PowerError::InvalidConfig` for an empty port list or a bad off time.
    pub fn new(config: CommandDriverConfig) -> Result<Self, PowerError> {
        Self::with_runner(config, Arc::new(ShellRunner::new()))
    }

    /// # Errors
    /// Returns `PowerError::InvalidConfig` for an empty port list or a bad off time.
    pub fn with_runner(
        config: CommandDriverConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, PowerError> {
        if config.ports.is_empty() {
            return Err(PowerError::InvalidConfig(
                "command driver needs at least one port".to_string(),
            ));
        }
        let min_off_time = match config.min_off_time {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|e| PowerError::InvalidConfig(format!("min_off_time: {e}")))?,
            None => DEFAULT_MIN_OFF_TIME,
        };

        Ok(Self {
            config,
            min_off_time,
            runner,
        })
    }

    /// Build from a JSON driver configuration
    ///
    /// # Errors
    /// Returns `PowerError::InvalidConfig` when the configuration does not parse.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, PowerError> {
        let config: CommandDriverConfig = serde_json::from_value(config.clone())
            .map_err(|e| PowerError::InvalidConfig(e.to_string()))?;
        Self::new(config)
    }

    fn render(template: &str, port_id: &str) -> String {
        template.replace("{port}", &shell_quote(port_id))
    }

    fn check_port(&self, port_id: &str) -> Result<(), PowerError> {
        if self.config.ports.iter().any(|p| p == port_id) {
            Ok(())
        } else {
            Err(PowerError::UnknownPort(port_id.to_string()))
        }
    }

    /// Run a command, retrying transient failures
    async fn run(&self, cmd: &str) -> Result<CommandOutput, PowerError> {
        let timeout = Duration::from_secs(self.config.timeout);
        let mut attempt = 0;

        loop {
            match self.runner.run(cmd, timeout).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_transient() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(command = %cmd, attempt, error = %e, "power command failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl PduDriver for CommandDriver {
    async fn ports(&self) -> Result<Vec<PortInfo>, PowerError> {
        Ok(self.config.ports.iter().map(PortInfo::new).collect())
    }

    async fn set_port_state(&self, port_id: &str, state: PortState) -> Result<bool, PowerError> {
        self.check_port(port_id)?;

        let template = match state {
            PortState::On => &self.config.on,
            PortState::Off => &self.config.off,
            PortState::Reboot => match &self.config.reboot {
                Some(reboot) => reboot,
                None => return Ok(false),
            },
            PortState::Unknown => return Ok(false),
        };

        let output = self.run(&Self::render(template, port_id)).await?;
        debug!(port = %port_id, %state, code = output.code, "power command finished");
        Ok(output.succeeded())
    }

    async fn get_port_state(&self, port_id: &str) -> Result<PortState, PowerError> {
        self.check_port(port_id)?;

        let output = self
            .run(&Self::render(&self.config.status, port_id))
            .await?;
        if !output.succeeded() {
            return Err(PowerError::Exec(format!(
                "status command exited with {}: {}",
                output.code,
                output.transcript()
            )));
        }

        output
            .stdout
            .trim()
            .parse()
            .map_err(|e| PowerError::Exec(format!("unexpected status output: {e}")))
    }

    fn driver_name(&self) -> &'static str {
        "command"
    }

    fn default_min_off_time(&self) -> Duration {
        self.min_off_time
    }
}
