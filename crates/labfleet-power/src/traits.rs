//! Power switch driver trait

use std::time::Duration;

use async_trait::async_trait;
use labfleet_api::PortState;

use crate::error::PowerError;
use crate::types::{DEFAULT_MIN_OFF_TIME, PortInfo};

/// A network-controlled power switch
///
/// Drivers are expected to retry their own transport errors; callers above
/// this trait never retry.
#[async_trait]
pub trait PduDriver: Send + Sync {
    /// Enumerate the switch's ports
    async fn ports(&self) -> Result<Vec<PortInfo>, PowerError>;

    /// Request a new state; `Ok(false)` when the switch refused it
    async fn set_port_state(&self, port_id: &str, state: PortState) -> Result<bool, PowerError>;

    /// Read the current state of a port
    async fn get_port_state(&self, port_id: &str) -> Result<PortState, PowerError>;

    /// Registry key this driver was built from
    fn driver_name(&self) -> &'static str;

    /// Off-time applied to ports of this switch unless a device overrides it
    fn default_min_off_time(&self) -> Duration {
        DEFAULT_MIN_OFF_TIME
    }
}
