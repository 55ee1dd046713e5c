//! labfleet daemon
//!
//! Hardware CI fleet orchestration: keeps one kameo actor per device under
//! test and exposes the fleet over an axum HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use eyre::WrapErr;
use kameo::prelude::*;
use labfleet_core::{
    FleetContext, FleetOrchestrator, FleetOrchestratorArgs, FleetStore, GitLabClient, PduRegistry,
    UnixSocketConnector, spawn_sync_loop,
};
use labfleet_exec::CommandLauncher;
use labfleet_power::DriverRegistry;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod router;
mod state;

use crate::config::{Config, LogFormat};
use crate::state::AppState;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.daemon.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_context(config: &Config) -> Result<FleetContext> {
    let settings = config.fleet_settings();
    std::fs::create_dir_all(&settings.runtime_dir).wrap_err_with(|| {
        format!(
            "failed to create the runtime directory {}",
            settings.runtime_dir.display()
        )
    })?;

    let store = FleetStore::open(&config.fleet.store_path).wrap_err_with(|| {
        format!(
            "failed to open the fleet store {}",
            config.fleet.store_path.display()
        )
    })?;
    let launcher = CommandLauncher::new(&config.fleet.runner_command)
        .with_args(config.fleet.runner_args.clone());

    Ok(FleetContext {
        settings,
        store: Arc::new(store),
        pdus: PduRegistry::new(DriverRegistry::with_builtin()),
        launcher: Arc::new(launcher),
        connector: Arc::new(UnixSocketConnector),
        forge: Arc::new(GitLabClient::new()?),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config = Config::load_default()?;
    init_tracing(&config);
    info!(bind = %config.daemon.bind, store = %config.fleet.store_path.display(), "labfleet starting");

    let ctx = Arc::new(build_context(&config)?);
    let orchestrator = FleetOrchestrator::spawn(FleetOrchestratorArgs { ctx: ctx.clone() });

    let (stop_tx, stop_rx) = watch::channel(false);
    let sync_loop = spawn_sync_loop(orchestrator.clone(), ctx.clone(), stop_rx.clone());

    let app = router::create_router(Arc::new(AppState::new(orchestrator.clone())));
    let listener = tokio::net::TcpListener::bind(&config.daemon.bind)
        .await
        .wrap_err_with(|| format!("failed to bind {}", config.daemon.bind))?;
    info!(addr = %config.daemon.bind, "listening for connections");

    let mut server_stop = stop_rx;
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = server_stop.wait_for(|stop| *stop).await;
            info!("HTTP server shutting down");
        })
        .await
    });

    shutdown_signal().await;
    info!("received shutdown signal");
    stop_tx.send_replace(true);

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "server error"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!("HTTP server did not shut down in time"),
    }
    if let Err(e) = sync_loop.await {
        error!(error = %e, "sync loop panicked");
    }

    if let Err(e) = orchestrator.stop_gracefully().await {
        warn!(error = %e, "orchestrator already stopped");
    }

    if let Err(e) = ctx.store.save_if_needed() {
        error!(error = %e, "failed to save the fleet store on exit");
    }
    info!("labfleet stopped");
    Ok(())
}
