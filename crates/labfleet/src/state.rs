//! Application state shared across HTTP handlers

use std::sync::Arc;

use kameo::actor::ActorRef;
use labfleet_core::{FleetOrchestrator, JobAdmission};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Reference to the orchestrator actor
    pub orchestrator: ActorRef<FleetOrchestrator>,
    /// Serializes job submissions
    pub admission: Arc<JobAdmission>,
}

impl AppState {
    /// Create new application state
    pub fn new(orchestrator: ActorRef<FleetOrchestrator>) -> Self {
        Self {
            orchestrator,
            admission: Arc::new(JobAdmission::new()),
        }
    }
}
