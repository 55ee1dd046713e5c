//! Discovery commands

use clap::{Args, Subcommand};
use color_eyre::Result;
use labfleet_api::requests::DiscoveryRequest;

use crate::output::print_json;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct DiscoverCommand {
    #[command(subcommand)]
    command: DiscoverSubcommand,
}

#[derive(Debug, Subcommand)]
enum DiscoverSubcommand {
    /// Power a port on and wait for its device to register
    Arm {
        pdu: String,
        port_id: String,

        /// Seconds before the window closes
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show the armed window
    Status,

    /// Close the window and power the port off
    Cancel,
}

impl DiscoverCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = &ctx.client;
        match self.command {
            DiscoverSubcommand::Arm {
                pdu,
                port_id,
                timeout,
            } => {
                let request = DiscoveryRequest {
                    pdu,
                    port_id,
                    timeout,
                };
                print_json(&client.arm_discovery(&request).await?)
            }
            DiscoverSubcommand::Status => match client.discovery().await? {
                Some(window) => print_json(&window),
                None => {
                    println!("no discovery in progress");
                    Ok(())
                }
            },
            DiscoverSubcommand::Cancel => {
                println!("{}", client.cancel_discovery().await?.message);
                Ok(())
            }
        }
    }
}
