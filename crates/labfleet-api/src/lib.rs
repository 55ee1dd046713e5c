//! labfleet-api: Shared API types and schemas
//!
//! Contains the state enums, request/response types, and OpenAPI schema
//! definitions used across the daemon, the core, the client, and the CLI.

pub mod requests;
pub mod responses;
pub mod types;

pub use types::{DeviceState, JobStatus, ParseStateError, PortState, QualifierState};
