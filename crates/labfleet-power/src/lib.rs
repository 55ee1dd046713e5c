//! labfleet-power: Power switch abstraction
//!
//! Provides the `PduDriver` trait, the `Pdu`/`PowerPort` wrappers that enforce
//! off-time and reservation rules on top of any driver, and the built-in
//! drivers (in-memory dummy, shell command).

pub mod command;
pub mod dummy;
pub mod error;
pub mod pdu;
pub mod port;
pub mod registry;
pub mod traits;
pub mod types;

pub use command::{CommandDriver, CommandDriverConfig};
pub use dummy::{DummyConfig, DummyDriver};
pub use error::PowerError;
pub use pdu::Pdu;
pub use port::{PortStats, PowerPort};
pub use registry::{DriverFactory, DriverRegistry};
pub use traits::PduDriver;
pub use types::{DEFAULT_MIN_OFF_TIME, PortInfo};
