//! Actor implementations

pub mod device;
pub mod orchestrator;

use kameo::error::SendError;

pub use device::{DeviceActor, DeviceActorArgs};
pub use orchestrator::{FleetOrchestrator, FleetOrchestratorArgs};

use crate::error::CoreError;

/// Unwrap the handler's own error from a failed `ask`
pub(crate) fn ask_error<M>(e: SendError<M, CoreError>) -> CoreError {
    match e {
        SendError::HandlerError(err) => err,
        other => CoreError::ActorError(other.to_string()),
    }
}
