//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use kameo::actor::ActorRef;
use kameo_macros::Reply;
use labfleet_api::DeviceState;
use labfleet_api::requests::{
    DevicePatchRequest, DeviceRegistrationRequest, DiscoveryRequest, PortPatchRequest,
};

use crate::actor::device::DeviceActor;
use crate::boot::BootQuery;
use crate::config::DeviceConfig;
use crate::runner::JobRequest;

// ============================================================================
// DeviceActor Messages
// ============================================================================

/// Full status of the device
#[derive(Debug)]
pub struct GetDeviceStatus;

/// Externally-visible state only
#[derive(Debug)]
pub struct GetDeviceState;

/// Persist operator-editable fields
#[derive(Debug)]
pub struct UpdateDeviceFields {
    pub patch: DevicePatchRequest,
}

/// The stored configuration changed
#[derive(Debug)]
pub struct ConfigChanged {
    pub config: DeviceConfig,
}

#[derive(Debug)]
pub struct QueueQuickCheck;

#[derive(Debug)]
pub struct GetQuickCheck;

/// Launch a job runner; replies with its pid once it is up
#[derive(Debug)]
pub struct StartJob {
    pub request: JobRequest,
}

/// Best-effort cancellation of the running job
#[derive(Debug)]
pub struct CancelJob;

/// Boot configuration served by the running job, if any
#[derive(Debug)]
pub struct GetBootConfig {
    pub query: BootQuery,
}

/// Stop the control loop and wait for it
#[derive(Debug)]
pub struct StopDevice;

// ============================================================================
// FleetOrchestrator Messages
// ============================================================================

/// Reload the fleet document and match device actors to it
#[derive(Debug)]
pub struct ReloadFleet;

/// What a reload changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Reply)]
pub struct ReloadSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// Fields of a device as reported at registration
///
/// Everything is optional so a registration can update a subset of an
/// existing device.
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub id: Option<String>,
    pub base_name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub manual_tags: Option<Vec<String>>,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub local_tty_device: Option<String>,
    pub ready_for_service: Option<bool>,
    pub is_retired: Option<bool>,
    pub pdu: Option<String>,
    pub pdu_port_id: Option<String>,
    pub pdu_off_delay: Option<f64>,
}

impl From<DeviceRegistrationRequest> for DeviceUpdate {
    fn from(req: DeviceRegistrationRequest) -> Self {
        Self {
            id: req.id,
            base_name: req.base_name,
            tags: req.tags,
            manual_tags: req.manual_tags,
            mac_address: req.mac_address,
            ip_address: req.ip_address,
            local_tty_device: req.local_tty_device,
            ready_for_service: req.ready_for_service,
            is_retired: req.is_retired,
            ..Self::default()
        }
    }
}

/// A device announced itself
#[derive(Debug)]
pub struct Discover {
    pub update: DeviceUpdate,
    /// Merge into an existing device instead of ignoring the announcement
    pub update_if_exists: bool,
}

/// Outcome of a discovery announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverOutcome {
    Created { id: String },
    Updated { id: String },
    Ignored { id: String },
}

impl DiscoverOutcome {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            DiscoverOutcome::Created { id }
            | DiscoverOutcome::Updated { id }
            | DiscoverOutcome::Ignored { id } => id,
        }
    }
}

/// Power a port on and wait for the device behind it to register
#[derive(Debug)]
pub struct ArmDiscovery {
    pub request: DiscoveryRequest,
}

/// Current discovery window, if any
#[derive(Debug)]
pub struct GetDiscovery;

/// Close the discovery window
#[derive(Debug)]
pub struct CancelDiscovery;

/// Status of every device, keyed by id
#[derive(Debug)]
pub struct ListDevices;

/// Status of one device, by id or full name
#[derive(Debug)]
pub struct GetDevice {
    pub id: String,
}

/// Actor of one device, by id or full name
#[derive(Debug)]
pub struct GetDeviceRef {
    pub id: String,
}

/// Forget a device, unregistering its forge runners
#[derive(Debug)]
pub struct RemoveDevice {
    pub id: String,
}

#[derive(Debug)]
pub struct PatchDevice {
    pub id: String,
    pub patch: DevicePatchRequest,
}

#[derive(Debug)]
pub struct QueueDeviceQuickCheck {
    pub id: String,
}

#[derive(Debug)]
pub struct GetDeviceQuickCheck {
    pub id: String,
}

/// Cancel the job a device is running
#[derive(Debug)]
pub struct CancelDeviceJob {
    pub id: String,
}

#[derive(Debug)]
pub struct GetDeviceBootConfig {
    pub id: String,
    pub query: BootQuery,
}

/// Snapshot of every PDU
#[derive(Debug)]
pub struct ListPdus;

#[derive(Debug)]
pub struct GetPdu {
    pub name: String,
}

#[derive(Debug)]
pub struct GetPort {
    pub pdu: String,
    pub port_id: String,
}

/// Operator change to a port's state or reservation
#[derive(Debug)]
pub struct PatchPort {
    pub pdu: String,
    pub port_id: String,
    pub patch: PortPatchRequest,
}

/// PDUs, devices, discovery window and server time
#[derive(Debug)]
pub struct FullState;

/// Devices a job could be admitted to, with their actors
#[derive(Debug)]
pub struct ListCandidates;

/// A device as seen by job admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub id: String,
    pub full_name: String,
    pub all_tags: Vec<String>,
    pub is_retired: bool,
    pub state: DeviceState,
}

pub type CandidateList = Vec<(DeviceCandidate, ActorRef<DeviceActor>)>;
