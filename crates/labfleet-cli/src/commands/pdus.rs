//! Power switch commands

use clap::{Args, Subcommand};
use color_eyre::Result;
use labfleet_api::requests::PortPatchRequest;
use labfleet_api::responses::PduSnapshot;
use tabled::Tabled;

use crate::output::{or_dash, print_json, print_rows};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct PdusCommand {
    #[command(subcommand)]
    command: PdusSubcommand,
}

#[derive(Debug, Subcommand)]
enum PdusSubcommand {
    /// List power switches
    List,

    /// Show the ports of one switch
    Get { name: String },

    /// Show or change one port
    Port(PortArgs),
}

#[derive(Debug, Args)]
struct PortArgs {
    pdu: String,
    port_id: String,

    #[arg(long, conflicts_with = "off")]
    on: bool,

    #[arg(long)]
    off: bool,

    /// Keep the port away from discovery and automatic control
    #[arg(long, conflicts_with = "release")]
    reserve: bool,

    #[arg(long)]
    release: bool,
}

impl PortArgs {
    fn patch(&self) -> Option<PortPatchRequest> {
        let state = if self.on {
            Some("ON".to_string())
        } else if self.off {
            Some("OFF".to_string())
        } else {
            None
        };
        let reserved = if self.reserve {
            Some(true)
        } else if self.release {
            Some(false)
        } else {
            None
        };
        (state.is_some() || reserved.is_some()).then_some(PortPatchRequest { state, reserved })
    }
}

#[derive(Tabled)]
struct PortRow {
    #[tabled(rename = "PORT")]
    port: String,
    #[tabled(rename = "LABEL")]
    label: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "RESERVED")]
    reserved: bool,
}

fn port_rows(pdu: &PduSnapshot) -> Vec<PortRow> {
    pdu.ports
        .iter()
        .map(|(id, port)| PortRow {
            port: id.clone(),
            label: or_dash(port.label.as_deref()),
            state: port.state.to_string(),
            reserved: port.reserved,
        })
        .collect()
}

#[derive(Tabled)]
struct PduRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DRIVER")]
    driver: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "PORTS")]
    ports: usize,
    #[tabled(rename = "ERROR")]
    error: String,
}

impl PdusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = &ctx.client;
        match self.command {
            PdusSubcommand::List => {
                let pdus = client.list_pdus().await?;
                let rows: Vec<PduRow> = pdus
                    .pdus
                    .iter()
                    .map(|(name, pdu)| PduRow {
                        name: name.clone(),
                        driver: pdu.driver.clone(),
                        state: pdu.state.clone(),
                        ports: pdu.ports.len(),
                        error: or_dash(pdu.error.as_deref()),
                    })
                    .collect();
                print_rows(&rows, &pdus, ctx.format)
            }
            PdusSubcommand::Get { name } => {
                let pdu = client.get_pdu(&name).await?;
                print_rows(&port_rows(&pdu), &pdu, ctx.format)
            }
            PdusSubcommand::Port(args) => {
                let port = match args.patch() {
                    Some(patch) => client.patch_port(&args.pdu, &args.port_id, &patch).await?,
                    None => client.get_port(&args.pdu, &args.port_id).await?,
                };
                print_json(&port)
            }
        }
    }
}
