//! Job submission

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;
use eyre::WrapErr;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Job description file
    job: PathBuf,

    /// Port the job runner calls back on
    #[arg(long)]
    port: u16,

    /// Host the job runner calls back, defaults to this machine's address
    #[arg(long)]
    host: Option<String>,

    /// Run on this device only
    #[arg(long)]
    device: Option<String>,

    /// Tag the device must carry (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long)]
    job_id: Option<String>,
}

pub async fn submit(ctx: CommandContext, args: SubmitArgs) -> Result<()> {
    let job = std::fs::read_to_string(&args.job)
        .wrap_err_with(|| format!("failed to read {}", args.job.display()))?;

    let mut builder = ctx.client.submit_job(job, args.port);
    if let Some(device) = args.device {
        builder = builder.device(device);
    }
    for tag in args.tags {
        builder = builder.tag(tag);
    }
    if let Some(host) = args.host {
        builder = builder.callback_host(host);
    }
    if let Some(job_id) = args.job_id {
        builder = builder.job_id(job_id);
    }

    let device = builder.send().await?;
    println!("job dispatched to {device}");
    Ok(())
}
