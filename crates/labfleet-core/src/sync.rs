//! Fleet synchronization loop
//!
//! Reloads the fleet store, reconciles device actors, keeps forge runners
//! registered and regenerates the runner configuration. Runs at startup,
//! whenever the store file changes, and every 30 minutes otherwise.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kameo::actor::ActorRef;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actor::ask_error;
use crate::actor::orchestrator::FleetOrchestrator;
use crate::context::FleetContext;
use crate::error::CoreError;
use crate::forge;
use crate::message::{ReloadFleet, ReloadSummary};
use crate::training::stop_requested;

/// Longest time between two syncs
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Pause after a failed sync
pub const RETRY_DELAY: Duration = Duration::from_secs(60);

/// One full synchronization pass
///
/// # Errors
/// Returns the first failing step; later steps are skipped.
pub async fn sync_fleet(
    orchestrator: &ActorRef<FleetOrchestrator>,
    ctx: &FleetContext,
) -> Result<ReloadSummary, CoreError> {
    let summary = orchestrator.ask(ReloadFleet).await.map_err(ask_error)?;

    forge::expose_on_forges(ctx.forge.as_ref(), &ctx.store, ctx.farm_name()).await?;

    if let Some(path) = &ctx.settings.runner_config_path {
        let doc = ctx.store.snapshot()?;
        forge::write_runner_config(path, &doc, ctx.farm_name())?;
    }

    if ctx.store.save_if_needed()? {
        info!("fleet store saved after sync");
    }
    Ok(summary)
}

/// Watch the directory holding `store_path`, signalling changes to the file
fn watch_store(
    store_path: &Path,
    changes: mpsc::UnboundedSender<()>,
) -> notify::Result<RecommendedWatcher> {
    let file_name = store_path.file_name().map(ToOwned::to_owned);
    let dir = match store_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let touches_store = event
                .paths
                .iter()
                .any(|p| p.file_name() == file_name.as_deref());
            if touches_store {
                let _ = changes.send(());
            }
        }
        Err(e) => warn!(error = %e, "fleet store watch error"),
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Run [`sync_fleet`] until `stop` is set
#[must_use]
pub fn spawn_sync_loop(
    orchestrator: ActorRef<FleetOrchestrator>,
    ctx: Arc<FleetContext>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (tx, mut changes) = mpsc::unbounded_channel();
        let _watcher = match watch_store(ctx.store.path(), tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(path = %ctx.store.path().display(), error = %e, "cannot watch the fleet store, relying on periodic syncs");
                None
            }
        };

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                () = stop_requested(&mut stop) => break,
                Some(()) = changes.recv() => debug!("fleet store changed on disk"),
                () = tokio::time::sleep(delay) => {}
            }
            while changes.try_recv().is_ok() {}

            delay = match sync_fleet(&orchestrator, &ctx).await {
                Ok(summary) => {
                    debug!(
                        created = summary.created.len(),
                        updated = summary.updated.len(),
                        removed = summary.removed.len(),
                        "fleet synchronized"
                    );
                    SYNC_INTERVAL
                }
                Err(e) => {
                    error!(error = %e, retry_in = ?RETRY_DELAY, "fleet sync failed");
                    RETRY_DELAY
                }
            };
        }

        info!("sync loop stopped");
    })
}
