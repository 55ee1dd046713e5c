//! Type definitions for power switches

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum off-time used when neither the driver nor the device sets one
pub const DEFAULT_MIN_OFF_TIME: Duration = Duration::from_secs(30);

/// A port as enumerated by a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Driver-level identifier
    pub port_id: String,
    /// Human-readable label, when the switch has one
    pub label: Option<String>,
}

impl PortInfo {
    /// Create a port without a label
    pub fn new(port_id: impl Into<String>) -> Self {
        Self {
            port_id: port_id.into(),
            label: None,
        }
    }

    /// Set label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
