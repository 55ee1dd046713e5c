//! Response types for the API

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{DeviceState, PortState, QualifierState};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Plain acknowledgement with a human-readable message
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Progress of a device's qualification
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrainingStatus {
    pub state: QualifierState,
    pub is_active: bool,
    pub is_registered: bool,
    pub boot_loop_counts: i32,
    pub qualifying_rate: u32,
    pub current_loop_count: u32,
    /// Outcome name to number of boot loops that ended with it
    pub statuses: BTreeMap<String, u32>,
}

/// Power port assigned to a device
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PduAssignment {
    pub name: Option<String>,
    pub port_id: Option<String>,
}

/// Full status of one device under test
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatus {
    pub id: String,
    pub base_name: String,
    pub full_name: String,
    pub state: DeviceState,
    pub ready_for_service: bool,
    pub is_retired: bool,
    pub has_pdu_assigned: bool,
    pub quick_check_queued: bool,
    pub local_tty_device: Option<String>,
    pub tags: Vec<String>,
    pub manual_tags: Vec<String>,
    pub mac_address: Option<String>,
    pub ip_address: String,
    pub training: TrainingStatus,
    pub pdu: PduAssignment,
    /// Seconds
    pub pdu_off_delay: f64,
    pub comment: Option<String>,
}

/// Observed state of one power port
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PortSnapshot {
    pub label: Option<String>,
    /// Seconds
    pub min_off_time: f64,
    pub state: PortState,
    pub last_shutdown: Option<DateTime<Utc>>,
    pub last_polled: Option<DateTime<Utc>>,
    pub reserved: bool,
}

/// Observed state of one power switch
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PduSnapshot {
    pub driver: String,
    pub ports: BTreeMap<String, PortSnapshot>,
    /// `READY` once the ports were enumerated, `ERROR` otherwise
    pub state: String,
    pub error: Option<String>,
}

/// An open discovery window
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DiscoveryStatus {
    pub pdu: String,
    pub port_id: String,
    pub armed_at: DateTime<Utc>,
    /// Seconds
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceListResponse {
    pub duts: BTreeMap<String, DeviceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PduListResponse {
    pub pdus: BTreeMap<String, PduSnapshot>,
}

/// Everything the daemon knows, in one document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FullStateResponse {
    pub pdus: BTreeMap<String, PduSnapshot>,
    pub duts: BTreeMap<String, DeviceStatus>,
    pub discover: Option<DiscoveryStatus>,
    pub now: DateTime<Utc>,
}

/// Result of a job submission
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobSubmitResponse {
    /// Protocol version
    pub version: u32,
    /// Device the job was dispatched to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}
