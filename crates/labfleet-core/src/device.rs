//! `DeviceCore`: the state of one device under test
//!
//! Shared between the device actor, which answers requests, and the device's
//! control loop, which drives qualification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use labfleet_api::requests::DevicePatchRequest;
use labfleet_api::responses::{DeviceStatus, PduAssignment};
use labfleet_api::{DeviceState, QualifierState};
use labfleet_exec::{JobProcess, LaunchSpec, kill_and_reap};
use labfleet_power::PowerPort;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::boot::{BootConfig, BootQuery};
use crate::config::DeviceConfig;
use crate::context::FleetContext;
use crate::error::CoreError;
use crate::qualifier::Qualifier;
use crate::runner::{self, JobRequest, RunnerEndpoint, RunnerPaths, render_payload};
use crate::state::{StateInputs, derive_state};
use crate::training;

/// How long a new job runner gets to bring up its control endpoint
const START_TIMEOUT: Duration = Duration::from_secs(15);
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long a killed runner gets to exit
pub(crate) const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DeviceCore {
    id: String,
    ctx: Arc<FleetContext>,
    paths: RunnerPaths,
    endpoint: Arc<dyn RunnerEndpoint>,
    config: RwLock<DeviceConfig>,
    quick_check_queued: AtomicBool,
    qualifier: Mutex<Qualifier>,
    /// Resolved power port, cleared whenever the configuration changes
    power_port: Mutex<Option<Arc<PowerPort>>>,
}

impl DeviceCore {
    pub fn new(id: impl Into<String>, config: DeviceConfig, ctx: Arc<FleetContext>) -> Self {
        let id = id.into();
        let paths = RunnerPaths::for_device(&ctx.settings.runtime_dir, &id);
        let endpoint = ctx.connector.connect(&paths);
        let qualifier = Qualifier::new(id.clone(), ctx.settings.training.clone());
        let quick_check_queued = config.available();

        Self {
            id,
            ctx,
            paths,
            endpoint,
            config: RwLock::new(config),
            quick_check_queued: AtomicBool::new(quick_check_queued),
            qualifier: Mutex::new(qualifier),
            power_port: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn paths(&self) -> &RunnerPaths {
        &self.paths
    }

    #[must_use]
    pub fn context(&self) -> &FleetContext {
        &self.ctx
    }

    /// Copy of the current configuration
    #[must_use]
    pub fn config(&self) -> DeviceConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn qualifier(&self) -> MutexGuard<'_, Qualifier> {
        self.qualifier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn endpoint(&self) -> &dyn RunnerEndpoint {
        self.endpoint.as_ref()
    }

    fn cached_port(&self) -> MutexGuard<'_, Option<Arc<PowerPort>>> {
        self.power_port
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a new configuration into account
    pub fn config_changed(&self, config: DeviceConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        *self.cached_port() = None;
    }

    /// The device's power port, if configured and reachable
    ///
    /// The port's off time is taken from the device's `pdu_off_delay`.
    pub async fn power_port(&self) -> Option<Arc<PowerPort>> {
        let cached = self.cached_port().clone();
        if cached.is_some() {
            return cached;
        }

        let config = self.config();
        let (Some(pdu), Some(port_id)) = (config.pdu.as_deref(), config.pdu_port_id.as_deref())
        else {
            return None;
        };

        match self.ctx.pdus.port(pdu, port_id).await {
            Ok(port) => {
                if let Ok(off_delay) = Duration::try_from_secs_f64(config.pdu_off_delay) {
                    port.set_min_off_time(off_delay);
                }
                *self.cached_port() = Some(port.clone());
                Some(port)
            }
            Err(e) => {
                debug!(device = %self.id, error = %e, "power port unavailable");
                None
            }
        }
    }

    pub fn queue_quick_check(&self) {
        info!(device = %self.id, "quick check queued");
        self.quick_check_queued.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn quick_check_queued(&self) -> bool {
        self.quick_check_queued.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_quick_check(&self) {
        self.quick_check_queued.store(false, Ordering::SeqCst);
    }

    /// Current externally-visible state
    pub async fn state(&self) -> DeviceState {
        let runner_state = runner::query_state(self.endpoint(), &self.paths.lock).await;
        let has_power_port = self.power_port().await.is_some();
        let config = self.config();

        let inputs = StateInputs {
            has_power_port,
            is_retired: config.is_retired,
            ready_for_service: config.ready_for_service,
            quick_check_queued: self.quick_check_queued(),
            qualifier: self.qualifier().state(),
        };
        derive_state(runner_state, &inputs)
    }

    /// Full status for the API
    ///
    /// # Errors
    /// Returns the store error when the fleet document cannot be read.
    pub async fn status(&self) -> Result<DeviceStatus, CoreError> {
        let state = self.state().await;
        let has_pdu_assigned = self.power_port().await.is_some();
        let config = self.config();
        let full_name = self
            .ctx
            .store
            .read(|doc| doc.full_name(self.ctx.farm_name(), &self.id))?
            .unwrap_or_else(|| self.id.clone());
        let training = self.qualifier().status();

        Ok(DeviceStatus {
            id: self.id.clone(),
            base_name: config.base_name,
            full_name,
            state,
            ready_for_service: config.ready_for_service,
            is_retired: config.is_retired,
            has_pdu_assigned,
            quick_check_queued: self.quick_check_queued(),
            local_tty_device: config.local_tty_device,
            tags: config.tags,
            manual_tags: config.manual_tags,
            mac_address: config.mac_address,
            ip_address: config.ip_address,
            training,
            pdu: PduAssignment {
                name: config.pdu,
                port_id: config.pdu_port_id,
            },
            pdu_off_delay: config.pdu_off_delay,
            comment: config.comment,
        })
    }

    /// Persist operator-editable fields
    ///
    /// Bringing a device back from retirement queues a quick check.
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` for invalid values (nothing is
    /// changed), `CoreError::NotFound` when the device left the store.
    pub fn update_fields(&self, patch: &DevicePatchRequest) -> Result<DeviceConfig, CoreError> {
        if let Some(delay) = patch.pdu_off_delay
            && (!delay.is_finite() || delay < 0.0)
        {
            return Err(CoreError::ConfigError(format!("invalid pdu_off_delay {delay}")));
        }

        let (was_retired, config) = self.ctx.store.with_lock(|doc| {
            let device = doc
                .duts
                .get_mut(&self.id)
                .ok_or_else(|| CoreError::NotFound(format!("device {}", self.id)))?;
            let was_retired = device.is_retired;

            if let Some(delay) = patch.pdu_off_delay {
                device.pdu_off_delay = delay;
            }
            if let Some(comment) = &patch.comment {
                device.comment = Some(comment.clone());
            }
            if let Some(ready) = patch.ready_for_service {
                device.ready_for_service = ready;
            }
            if let Some(retired) = patch.is_retired {
                device.is_retired = retired;
            }
            if let Some(tags) = &patch.manual_tags {
                device.manual_tags.clone_from(tags);
            }

            device.validate().map_err(CoreError::ConfigError)?;
            Ok::<_, CoreError>((was_retired, device.clone()))
        })?;

        if was_retired && !config.is_retired {
            self.queue_quick_check();
        }
        self.config_changed(config.clone());
        Ok(config)
    }

    fn set_ready_for_service(&self, ready: bool) -> Result<(), CoreError> {
        self.update_fields(&DevicePatchRequest {
            ready_for_service: Some(ready),
            ..DevicePatchRequest::default()
        })
        .map(|_| ())
    }

    /// Launch a job runner for `request` and wait for it to come up
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` without a power port (nothing is
    /// launched), the launch error, or `CoreError::Timeout` when the runner
    /// never served its control endpoint (it is killed).
    pub async fn start_job(
        &self,
        request: &JobRequest,
        quiet: bool,
    ) -> Result<Box<dyn JobProcess>, CoreError> {
        let port = self.power_port().await.ok_or_else(|| {
            CoreError::ConfigError(format!("device {} has no usable power port", self.id))
        })?;

        let fleet = self.ctx.store.snapshot()?;
        let payload = render_payload(&fleet, request, &self.id, &port.stats())?;
        let spec = LaunchSpec {
            device_id: self.id.clone(),
            socket_path: self.paths.socket.clone(),
            lock_path: self.paths.lock.clone(),
            payload,
            quiet,
        };

        let mut process = self.ctx.launcher.launch(spec).await?;
        info!(device = %self.id, job_id = %request.job_id, pid = ?process.pid(), "job runner launched");

        let deadline = Instant::now() + START_TIMEOUT;
        loop {
            if runner::is_listening(self.endpoint()).await {
                return Ok(process);
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(START_POLL_INTERVAL).await;
        }

        warn!(device = %self.id, job_id = %request.job_id, "job runner never came up, killing it");
        kill_and_reap(process.as_mut(), EXIT_TIMEOUT).await;
        Err(CoreError::Timeout("the job process failed to start".to_string()))
    }

    /// Best-effort cancellation of the running job
    pub async fn cancel_job(&self) -> bool {
        let cancelled = runner::cancel_job(self.endpoint()).await;
        info!(device = %self.id, cancelled, "job cancellation requested");
        cancelled
    }

    pub async fn boot_config(&self, query: &BootQuery) -> Option<BootConfig> {
        runner::fetch_boot_config(self.endpoint(), query).await
    }

    /// One round of the control loop
    pub(crate) async fn tick(&self, stop: &mut watch::Receiver<bool>) -> Result<(), CoreError> {
        let state = self.state().await;
        let config = self.config();

        {
            let mut qualifier = self.qualifier();
            let current = qualifier.state();
            if state == DeviceState::Training && current == QualifierState::Idle {
                qualifier.set_state(QualifierState::Enrolling)?;
            } else if state == DeviceState::QuickCheck && current == QualifierState::Idle {
                qualifier.set_state(QualifierState::QuickCheck)?;
            } else if current == QualifierState::Enrolling
                && (config.ready_for_service || config.is_retired)
            {
                info!(device = %self.id, "training no longer needed");
                qualifier.set_state(QualifierState::Idle)?;
            }

            if !qualifier.is_active() {
                return Ok(());
            }
        }

        training::execute_step(self, stop).await?;

        if *stop.borrow() {
            return Ok(());
        }

        let (state, result) = {
            let qualifier = self.qualifier();
            (qualifier.state(), qualifier.result())
        };
        let Some(result) = result else {
            return Ok(());
        };

        match state {
            QualifierState::Enrolling => self.set_ready_for_service(result)?,
            QualifierState::QuickCheck => {
                if !result {
                    self.set_ready_for_service(false)?;
                }
                self.clear_quick_check();
            }
            QualifierState::Idle | QualifierState::RegistrationFailed => {}
        }
        self.qualifier().set_state(QualifierState::Idle)
    }
}

impl std::fmt::Debug for DeviceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCore")
            .field("id", &self.id)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}
