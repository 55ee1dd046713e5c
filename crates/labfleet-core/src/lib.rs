//! labfleet-core: Actor framework and orchestration logic
//!
//! Implements the `FleetOrchestrator` and `DeviceActor` using the kameo
//! framework, the shared fleet store, device qualification and job admission.

pub mod actor;
pub mod admission;
pub mod boot;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod forge;
pub mod lock;
pub mod message;
pub mod pdus;
pub mod qualifier;
pub mod runner;
pub mod settings;
pub mod state;
pub mod store;
pub mod sync;
pub mod training;

pub use actor::device::{DeviceActor, DeviceActorArgs};
pub use actor::orchestrator::{FleetOrchestrator, FleetOrchestratorArgs};
pub use admission::{Admission, AdmissionError, JobAdmission, select_target};
pub use boot::{BootConfig, BootDefaults, BootQuery};
pub use config::{DeviceConfig, FleetDocument, ForgeConfig, PduConfig, RunnerType};
pub use context::FleetContext;
pub use error::{CoreError, ErrorClass, StoreError};
pub use forge::{ForgeClient, GitLabClient};
pub use message::{
    ArmDiscovery, CancelDeviceJob, CancelDiscovery, Discover, DiscoverOutcome, DeviceUpdate,
    FullState, GetDevice, GetDeviceBootConfig, GetDeviceQuickCheck, GetDiscovery, GetPdu, GetPort,
    ListDevices, ListPdus, PatchDevice, PatchPort, QueueDeviceQuickCheck, ReloadFleet,
    ReloadSummary, RemoveDevice,
};
pub use pdus::PduRegistry;
pub use runner::{JobCallback, JobRequest, RunnerConnector, RunnerEndpoint, UnixSocketConnector};
pub use settings::{FleetSettings, TrainingSettings};
pub use store::FleetStore;
pub use sync::{spawn_sync_loop, sync_fleet};
