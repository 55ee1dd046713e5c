//! labfleet-exec: Process execution abstraction
//!
//! Runs short local commands (used by command-driven power drivers) and
//! launches the long-lived per-device job-runner processes.

pub mod command;
pub mod error;
pub mod process;

pub use command::{CommandOutput, CommandRunner, ShellRunner};
pub use error::ExecError;
pub use process::{
    ChildProcess, CommandLauncher, JobLauncher, JobProcess, LaunchSpec, kill_and_reap,
    wait_with_timeout,
};
