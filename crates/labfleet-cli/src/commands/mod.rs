//! CLI commands

mod devices;
mod discovery;
mod jobs;
mod pdus;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use labfleet_client::HttpClient;

use crate::output::{OutputFormat, print_json};

/// Manage a labfleet hardware CI fleet
#[derive(Debug, Parser)]
#[command(name = "labfleetctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the labfleet daemon
    #[arg(long, global = true, env = "LABFLEET_URL", default_value = "http://localhost:8000")]
    url: String,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check that the daemon answers
    Health,

    /// Dump pdus, devices and the discovery window as JSON
    State,

    /// Manage devices under test
    #[command(alias = "dut")]
    Devices(devices::DevicesCommand),

    /// Inspect and switch power ports
    #[command(alias = "pdu")]
    Pdus(pdus::PdusCommand),

    /// Find the device behind a power port
    Discover(discovery::DiscoverCommand),

    /// Submit a job to the fleet
    Submit(jobs::SubmitArgs),
}

/// What every command needs
pub struct CommandContext {
    pub client: HttpClient,
    pub format: OutputFormat,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            client: HttpClient::new(&self.url)?,
            format: self.format,
        };

        match self.command {
            Commands::Health => {
                let health = ctx.client.health().await?;
                println!("{}", health.status);
                Ok(())
            }
            Commands::State => print_json(&ctx.client.full_state().await?),
            Commands::Devices(cmd) => cmd.run(ctx).await,
            Commands::Pdus(cmd) => cmd.run(ctx).await,
            Commands::Discover(cmd) => cmd.run(ctx).await,
            Commands::Submit(args) => jobs::submit(ctx, args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_port_switch() {
        let cli = Cli::try_parse_from(["labfleetctl", "pdu", "port", "bench", "3", "--on"]).unwrap();
        assert!(matches!(cli.command, Commands::Pdus(_)));
        assert_eq!(cli.url, "http://localhost:8000");
    }

    #[test]
    fn test_submit_requires_callback_port() {
        assert!(Cli::try_parse_from(["labfleetctl", "submit", "job.yml"]).is_err());
        assert!(
            Cli::try_parse_from(["labfleetctl", "--format", "json", "submit", "job.yml", "--port", "4242"])
                .is_ok()
        );
    }
}
