//! `DeviceActor`: one device under test
//!
//! Answers requests about the device and owns its control loop, which polls
//! the device about once a second and drives qualification.

use std::sync::Arc;
use std::time::Duration;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use labfleet_api::DeviceState;
use labfleet_api::responses::DeviceStatus;
use labfleet_exec::{ExecError, JobProcess, kill_and_reap, wait_with_timeout};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::boot::BootConfig;
use crate::config::DeviceConfig;
use crate::context::FleetContext;
use crate::device::{DeviceCore, EXIT_TIMEOUT};
use crate::error::CoreError;
use crate::message::{
    CancelJob, ConfigChanged, GetBootConfig, GetDeviceState, GetDeviceStatus, GetQuickCheck,
    QueueQuickCheck, StartJob, StopDevice, UpdateDeviceFields,
};
use crate::training::stop_requested;

/// Pause between two rounds of the control loop
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Arguments for spawning a `DeviceActor`
pub struct DeviceActorArgs {
    pub id: String,
    pub config: DeviceConfig,
    pub ctx: Arc<FleetContext>,
}

pub struct DeviceActor {
    core: Arc<DeviceCore>,
    stop_tx: watch::Sender<bool>,
    control_loop: Option<JoinHandle<()>>,
    /// Tasks reaping the job runners this actor started
    job_waiters: Vec<JoinHandle<()>>,
}

impl DeviceActor {
    #[must_use]
    pub fn id(&self) -> &str {
        self.core.id()
    }

    /// Stop the control loop, cancelling the running job, and wait for it
    async fn shutdown(&mut self) {
        let Some(handle) = self.control_loop.take() else {
            return;
        };

        self.stop_tx.send_replace(true);
        self.core.cancel_job().await;
        if let Err(e) = handle.await {
            warn!(device = %self.core.id(), error = %e, "control loop panicked");
        }
        for waiter in self.job_waiters.drain(..) {
            if let Err(e) = waiter.await {
                warn!(device = %self.core.id(), error = %e, "job waiter panicked");
            }
        }
        info!(device = %self.core.id(), "control loop stopped");
    }
}

/// Wait for a job runner to exit
///
/// Once `stop` is set the runner gets [`EXIT_TIMEOUT`] to honour the
/// cancellation before it is killed.
async fn reap_job(
    mut process: Box<dyn JobProcess>,
    device: String,
    job_id: String,
    mut stop: watch::Receiver<bool>,
) {
    let exited = tokio::select! {
        exited = process.wait() => exited,
        () = stop_requested(&mut stop) => {
            match wait_with_timeout(process.as_mut(), EXIT_TIMEOUT).await {
                Err(ExecError::Timeout(_)) => {
                    warn!(device = %device, %job_id, "job runner outlived its cancellation, killing it");
                    kill_and_reap(process.as_mut(), EXIT_TIMEOUT).await;
                    return;
                }
                exited => exited,
            }
        }
    };

    match exited {
        Ok(code) => info!(device = %device, %job_id, ?code, "job runner exited"),
        Err(e) => warn!(device = %device, %job_id, error = %e, "lost track of job runner"),
    }
}

async fn control_loop(core: Arc<DeviceCore>, mut stop: watch::Receiver<bool>) {
    debug!(device = %core.id(), "control loop started");

    loop {
        if *stop.borrow() {
            break;
        }

        if let Err(e) = core.tick(&mut stop).await {
            warn!(device = %core.id(), error = %e, "control loop iteration failed");
        }

        tokio::select! {
            () = stop_requested(&mut stop) => break,
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

impl Actor for DeviceActor {
    type Args = DeviceActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(device = %args.id, id = %actor_ref.id(), "DeviceActor starting");

        let core = Arc::new(DeviceCore::new(args.id, args.config, args.ctx));
        let (stop_tx, stop_rx) = watch::channel(false);
        let control_loop = tokio::spawn(control_loop(core.clone(), stop_rx));

        Ok(Self {
            core,
            stop_tx,
            control_loop: Some(control_loop),
            job_waiters: Vec::new(),
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(device = %self.core.id(), reason = ?reason, "DeviceActor stopping");
        self.shutdown().await;
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<GetDeviceStatus> for DeviceActor {
    type Reply = Result<DeviceStatus, CoreError>;

    async fn handle(
        &mut self,
        _msg: GetDeviceStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.core.status().await
    }
}

impl Message<GetDeviceState> for DeviceActor {
    type Reply = Result<DeviceState, CoreError>;

    async fn handle(
        &mut self,
        _msg: GetDeviceState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.core.state().await)
    }
}

impl Message<UpdateDeviceFields> for DeviceActor {
    type Reply = Result<DeviceConfig, CoreError>;

    async fn handle(
        &mut self,
        msg: UpdateDeviceFields,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.core.update_fields(&msg.patch)
    }
}

impl Message<ConfigChanged> for DeviceActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: ConfigChanged,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.core.config_changed(msg.config);
        Ok(())
    }
}

impl Message<QueueQuickCheck> for DeviceActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        _msg: QueueQuickCheck,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.core.queue_quick_check();
        Ok(())
    }
}

impl Message<GetQuickCheck> for DeviceActor {
    type Reply = Result<bool, CoreError>;

    async fn handle(
        &mut self,
        _msg: GetQuickCheck,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.core.quick_check_queued())
    }
}

impl Message<StartJob> for DeviceActor {
    type Reply = Result<Option<u32>, CoreError>;

    async fn handle(
        &mut self,
        msg: StartJob,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let process = self.core.start_job(&msg.request, false).await?;
        let pid = process.pid();

        self.job_waiters.retain(|waiter| !waiter.is_finished());
        self.job_waiters.push(tokio::spawn(reap_job(
            process,
            self.core.id().to_string(),
            msg.request.job_id,
            self.stop_tx.subscribe(),
        )));

        Ok(pid)
    }
}

impl Message<CancelJob> for DeviceActor {
    type Reply = Result<bool, CoreError>;

    async fn handle(
        &mut self,
        _msg: CancelJob,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.core.cancel_job().await)
    }
}

impl Message<GetBootConfig> for DeviceActor {
    type Reply = Result<Option<BootConfig>, CoreError>;

    async fn handle(
        &mut self,
        msg: GetBootConfig,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.core.boot_config(&msg.query).await)
    }
}

impl Message<StopDevice> for DeviceActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        _msg: StopDevice,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// A runner that only exits when told to, either way
    struct ScriptedProcess {
        exit_now: Arc<AtomicBool>,
        killed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl JobProcess for ScriptedProcess {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        async fn wait(&mut self) -> Result<Option<i32>, ExecError> {
            loop {
                if self.killed.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                if self.exit_now.load(Ordering::SeqCst) {
                    return Ok(Some(0));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        fn start_kill(&mut self) -> Result<(), ExecError> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scripted() -> (Box<dyn JobProcess>, Arc<AtomicBool>, Arc<AtomicBool>) {
        let exit_now = Arc::new(AtomicBool::new(false));
        let killed = Arc::new(AtomicBool::new(false));
        let process = ScriptedProcess {
            exit_now: exit_now.clone(),
            killed: killed.clone(),
        };
        (Box::new(process), exit_now, killed)
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_ends_with_the_job() {
        let (process, exit_now, killed) = scripted();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let waiter = tokio::spawn(reap_job(process, "dev".into(), "job".into(), stop_rx));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!waiter.is_finished());

        exit_now.store(true, Ordering::SeqCst);
        waiter.await.unwrap();
        assert!(!killed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_kills_a_runner_that_ignores_cancellation() {
        let (process, _exit_now, killed) = scripted();
        let (stop_tx, stop_rx) = watch::channel(false);
        let waiter = tokio::spawn(reap_job(process, "dev".into(), "job".into(), stop_rx));

        stop_tx.send_replace(true);
        tokio::time::sleep(EXIT_TIMEOUT / 2).await;
        assert!(!killed.load(Ordering::SeqCst));

        waiter.await.unwrap();
        assert!(killed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_lets_a_cancelled_runner_exit() {
        let (process, exit_now, killed) = scripted();
        let (stop_tx, stop_rx) = watch::channel(false);
        let waiter = tokio::spawn(reap_job(process, "dev".into(), "job".into(), stop_rx));

        stop_tx.send_replace(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        exit_now.store(true, Ordering::SeqCst);

        waiter.await.unwrap();
        assert!(!killed.load(Ordering::SeqCst));
    }
}
