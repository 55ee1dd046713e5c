//! Device commands

use clap::{Args, Subcommand};
use color_eyre::Result;
use labfleet_api::requests::{DevicePatchRequest, DeviceRegistrationRequest};
use labfleet_api::responses::DeviceStatus;
use tabled::Tabled;

use crate::output::{or_dash, print_json, print_rows};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct DevicesCommand {
    #[command(subcommand)]
    command: DevicesSubcommand,
}

#[derive(Debug, Subcommand)]
enum DevicesSubcommand {
    /// List every device
    List,

    /// Show one device
    Get { id: String },

    /// Register a device by hand
    Register(RegisterArgs),

    /// Change operator-editable fields
    Patch(PatchArgs),

    /// Forget a device
    Remove { id: String },

    /// Queue a quick check on a device
    QuickCheck { id: String },

    /// Cancel the job running on a device
    Cancel { id: String },

    /// Show the boot configuration the device would get
    BootConfig { id: String },
}

#[derive(Debug, Args)]
struct RegisterArgs {
    /// MAC address, also used as the id
    #[arg(long)]
    mac: String,

    #[arg(long)]
    base_name: String,

    #[arg(long)]
    ip: String,

    /// Tag to attach (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Serial console on the daemon host
    #[arg(long)]
    tty: Option<String>,
}

#[derive(Debug, Args)]
struct PatchArgs {
    id: String,

    #[arg(long)]
    comment: Option<String>,

    /// Minimum power-off time in seconds
    #[arg(long)]
    off_delay: Option<f64>,

    #[arg(long)]
    ready: Option<bool>,

    #[arg(long)]
    retired: Option<bool>,

    /// Replace the manual tags (repeatable)
    #[arg(long = "manual-tag")]
    manual_tags: Option<Vec<String>>,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "PDU")]
    pdu: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "TAGS")]
    tags: String,
}

impl From<&DeviceStatus> for DeviceRow {
    fn from(device: &DeviceStatus) -> Self {
        let pdu = match (&device.pdu.name, &device.pdu.port_id) {
            (Some(name), Some(port)) => format!("{name}/{port}"),
            _ => or_dash(None),
        };
        Self {
            name: device.full_name.clone(),
            id: device.id.clone(),
            state: device.state.to_string(),
            pdu,
            ip: device.ip_address.clone(),
            tags: device.tags.join(","),
        }
    }
}

impl DevicesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = &ctx.client;
        match self.command {
            DevicesSubcommand::List => {
                let devices = client.list_devices().await?;
                let rows: Vec<DeviceRow> = devices.duts.values().map(DeviceRow::from).collect();
                print_rows(&rows, &devices, ctx.format)
            }
            DevicesSubcommand::Get { id } => print_json(&client.get_device(&id).await?),
            DevicesSubcommand::Register(args) => {
                let request = DeviceRegistrationRequest {
                    base_name: Some(args.base_name),
                    tags: Some(args.tags),
                    mac_address: Some(args.mac),
                    ip_address: Some(args.ip),
                    local_tty_device: args.tty,
                    ..DeviceRegistrationRequest::default()
                };
                let device = client.register_device(&request).await?;
                println!("registered {} ({})", device.full_name, device.id);
                Ok(())
            }
            DevicesSubcommand::Patch(args) => {
                let patch = DevicePatchRequest {
                    pdu_off_delay: args.off_delay,
                    comment: args.comment,
                    ready_for_service: args.ready,
                    is_retired: args.retired,
                    manual_tags: args.manual_tags,
                };
                print_json(&client.patch_device(&args.id, &patch).await?)
            }
            DevicesSubcommand::Remove { id } => {
                println!("{}", client.delete_device(&id).await?.message);
                Ok(())
            }
            DevicesSubcommand::QuickCheck { id } => {
                let queued = client.queue_quick_check(&id).await?;
                println!("quick check queued: {queued}");
                Ok(())
            }
            DevicesSubcommand::Cancel { id } => {
                println!("{}", client.cancel_job(&id).await?.message);
                Ok(())
            }
            DevicesSubcommand::BootConfig { id } => print_json(&client.boot_config(&id).await?),
        }
    }
}
