//! In-memory power switch
//!
//! Useful for labs without a controllable switch and for tests: every call is
//! recorded, and failures can be injected.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use labfleet_api::PortState;
use serde::Deserialize;
use tracing::debug;

use crate::error::PowerError;
use crate::traits::PduDriver;
use crate::types::{DEFAULT_MIN_OFF_TIME, PortInfo};

/// Configuration accepted by the `dummy` driver
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DummyConfig {
    /// Number of ports, named `1..=ports`
    #[serde(default = "default_port_count")]
    pub ports: usize,
    /// Default minimum off time in seconds
    #[serde(default)]
    pub min_off_time: Option<f64>,
}

fn default_port_count() -> usize {
    8
}

#[derive(Debug, Default)]
struct DummyState {
    states: BTreeMap<String, PortState>,
    set_calls: Vec<(String, PortState)>,
    unreachable: bool,
    reject: bool,
}

/// Power switch that only exists in memory
#[derive(Debug)]
pub struct DummyDriver {
    ports: Vec<PortInfo>,
    min_off_time: Duration,
    state: Mutex<DummyState>,
}

impl DummyDriver {
    /// Create a switch with `count` ports, all OFF
    #[must_use]
    pub fn new(count: usize) -> Self {
        let ports: Vec<PortInfo> = (1..=count)
            .map(|i| PortInfo::new(i.to_string()).with_label(format!("outlet {i}")))
            .collect();
        let states = ports
            .iter()
            .map(|p| (p.port_id.clone(), PortState::Off))
            .collect();

        Self {
            ports,
            min_off_time: DEFAULT_MIN_OFF_TIME,
            state: Mutex::new(DummyState {
                states,
                ..DummyState::default()
            }),
        }
    }

    /// Build from a JSON driver configuration
    ///
    /// # Errors
    /// Returns `PowerError::InvalidConfig` when the configuration does not parse.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, PowerError> {
        let config: DummyConfig = if config.is_null() {
            serde_json::from_value(serde_json::json!({}))
        } else {
            serde_json::from_value(config.clone())
        }
        .map_err(|e| PowerError::InvalidConfig(e.to_string()))?;

        let mut driver = Self::new(config.ports);
        if let Some(secs) = config.min_off_time {
            driver.min_off_time = Duration::try_from_secs_f64(secs)
                .map_err(|e| PowerError::InvalidConfig(format!("min_off_time: {e}")))?;
        }
        Ok(driver)
    }

    fn state(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change a port behind the daemon's back
    pub fn force_state(&self, port_id: &str, state: PortState) {
        self.state().states.insert(port_id.to_string(), state);
    }

    /// Make every call fail with a transport error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Make every state change be refused
    pub fn set_reject(&self, reject: bool) {
        self.state().reject = reject;
    }

    /// All accepted `set_port_state` calls, oldest first
    #[must_use]
    pub fn set_calls(&self) -> Vec<(String, PortState)> {
        self.state().set_calls.clone()
    }

    fn check_port(&self, port_id: &str) -> Result<(), PowerError> {
        if self.ports.iter().any(|p| p.port_id == port_id) {
            Ok(())
        } else {
            Err(PowerError::UnknownPort(port_id.to_string()))
        }
    }
}

#[async_trait]
impl PduDriver for DummyDriver {
    async fn ports(&self) -> Result<Vec<PortInfo>, PowerError> {
        if self.state().unreachable {
            return Err(PowerError::Transport("dummy switch unreachable".to_string()));
        }
        Ok(self.ports.clone())
    }

    async fn set_port_state(&self, port_id: &str, state: PortState) -> Result<bool, PowerError> {
        self.check_port(port_id)?;

        let mut inner = self.state();
        if inner.unreachable {
            return Err(PowerError::Transport("dummy switch unreachable".to_string()));
        }
        if inner.reject {
            return Ok(false);
        }

        debug!(port = %port_id, %state, "dummy port set");
        // A reboot leaves the outlet powered
        let settled = if state == PortState::Reboot {
            PortState::On
        } else {
            state
        };
        inner.states.insert(port_id.to_string(), settled);
        inner.set_calls.push((port_id.to_string(), state));
        Ok(true)
    }

    async fn get_port_state(&self, port_id: &str) -> Result<PortState, PowerError> {
        self.check_port(port_id)?;

        let inner = self.state();
        if inner.unreachable {
            return Err(PowerError::Transport("dummy switch unreachable".to_string()));
        }
        Ok(inner
            .states
            .get(port_id)
            .copied()
            .unwrap_or(PortState::Unknown))
    }

    fn driver_name(&self) -> &'static str {
        "dummy"
    }

    fn default_min_off_time(&self) -> Duration {
        self.min_off_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_defaults() {
        let driver = DummyDriver::from_config(&serde_json::Value::Null).unwrap();
        assert_eq!(driver.ports.len(), 8);
        assert_eq!(driver.default_min_off_time(), DEFAULT_MIN_OFF_TIME);
    }

    #[test]
    fn test_from_config_rejects_unknown_keys() {
        let res = DummyDriver::from_config(&serde_json::json!({"hostname": "10.0.0.2"}));
        assert!(matches!(res, Err(PowerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unknown_port() {
        let driver = DummyDriver::new(2);
        let err = driver.get_port_state("3").await.unwrap_err();
        assert!(matches!(err, PowerError::UnknownPort(_)));
    }
}
