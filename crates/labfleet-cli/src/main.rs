//! labfleetctl
//!
//! Operator command line for the labfleet daemon

use clap::Parser;
use color_eyre::Result;

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    Cli::parse().run().await
}
