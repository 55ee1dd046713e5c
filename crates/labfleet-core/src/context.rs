//! `FleetContext`: the collaborators every actor shares
//!
//! Built once at startup and handed to the orchestrator, which passes it on
//! to each device actor.

use std::sync::Arc;

use labfleet_exec::JobLauncher;

use crate::forge::ForgeClient;
use crate::pdus::PduRegistry;
use crate::runner::RunnerConnector;
use crate::settings::FleetSettings;
use crate::store::FleetStore;

pub struct FleetContext {
    pub settings: FleetSettings,
    pub store: Arc<FleetStore>,
    pub pdus: PduRegistry,
    /// Starts job-runner processes
    pub launcher: Arc<dyn JobLauncher>,
    /// Reaches the control endpoint of a running job runner
    pub connector: Arc<dyn RunnerConnector>,
    pub forge: Arc<dyn ForgeClient>,
}

impl FleetContext {
    #[must_use]
    pub fn farm_name(&self) -> &str {
        &self.settings.farm_name
    }
}

impl std::fmt::Debug for FleetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetContext")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .field("pdus", &self.pdus)
            .finish_non_exhaustive()
    }
}
