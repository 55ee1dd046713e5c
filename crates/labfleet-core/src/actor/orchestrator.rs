//! `FleetOrchestrator`: fleet-wide orchestration
//!
//! Keeps one `DeviceActor` per device of the fleet document, runs the
//! discovery window, and answers fleet-wide queries for the API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use labfleet_api::responses::{
    DeviceListResponse, DeviceStatus, DiscoveryStatus, FullStateResponse, PduListResponse,
    PduSnapshot, PortSnapshot,
};
use labfleet_api::{DeviceState, PortState};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::actor::ask_error;
use crate::actor::device::{DeviceActor, DeviceActorArgs};
use crate::boot::BootConfig;
use crate::config::{DeviceConfig, FleetDocument};
use crate::context::FleetContext;
use crate::error::CoreError;
use crate::forge;
use crate::message::{
    ArmDiscovery, CancelDeviceJob, CancelDiscovery, CancelJob, CandidateList, ConfigChanged,
    DeviceCandidate, DeviceUpdate, Discover, DiscoverOutcome, FullState, GetBootConfig, GetDevice,
    GetDeviceBootConfig, GetDeviceQuickCheck, GetDeviceRef, GetDeviceState, GetDeviceStatus,
    GetDiscovery, GetPdu, GetPort, GetQuickCheck, ListCandidates, ListDevices, ListPdus,
    PatchDevice, PatchPort, QueueDeviceQuickCheck, QueueQuickCheck, ReloadFleet, ReloadSummary,
    RemoveDevice, StopDevice, UpdateDeviceFields,
};

/// How long a discovery window stays open unless told otherwise
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(150);

/// Arguments for spawning a `FleetOrchestrator`
pub struct FleetOrchestratorArgs {
    pub ctx: Arc<FleetContext>,
}

/// A port powered on to find out which device sits behind it
#[derive(Debug, Clone)]
struct DiscoveryWindow {
    pdu: String,
    port_id: String,
    armed_at: DateTime<Utc>,
    opened: Instant,
    timeout: Duration,
}

impl DiscoveryWindow {
    fn expired(&self) -> bool {
        self.opened.elapsed() >= self.timeout
    }

    fn status(&self) -> DiscoveryStatus {
        DiscoveryStatus {
            pdu: self.pdu.clone(),
            port_id: self.port_id.clone(),
            armed_at: self.armed_at,
            timeout: self.timeout.as_secs(),
        }
    }
}

/// Fleet orchestrator managing all device actors
pub struct FleetOrchestrator {
    ctx: Arc<FleetContext>,
    /// Device actors by device id
    devices: BTreeMap<String, ActorRef<DeviceActor>>,
    /// Configuration each actor was last given
    configs: BTreeMap<String, DeviceConfig>,
    discovery: Option<DiscoveryWindow>,
}

/// Merge the announced fields into `config`
fn apply_update(config: &mut DeviceConfig, update: &DeviceUpdate) {
    if let Some(base_name) = &update.base_name {
        config.base_name.clone_from(base_name);
    }
    if let Some(tags) = &update.tags {
        config.tags.clone_from(tags);
    }
    if let Some(tags) = &update.manual_tags {
        config.manual_tags.clone_from(tags);
    }
    if let Some(mac) = &update.mac_address {
        config.mac_address = Some(mac.clone());
    }
    if let Some(ip) = &update.ip_address {
        config.ip_address.clone_from(ip);
    }
    if let Some(tty) = &update.local_tty_device {
        config.local_tty_device = Some(tty.clone());
    }
    if let Some(ready) = update.ready_for_service {
        config.ready_for_service = ready;
    }
    if let Some(retired) = update.is_retired {
        config.is_retired = retired;
    }
    if let Some(pdu) = &update.pdu {
        config.pdu = Some(pdu.clone());
    }
    if let Some(port_id) = &update.pdu_port_id {
        config.pdu_port_id = Some(port_id.clone());
    }
    if let Some(delay) = update.pdu_off_delay {
        config.pdu_off_delay = delay;
    }
}

fn not_found(id: &str) -> CoreError {
    CoreError::NotFound(format!("device {id}"))
}

impl FleetOrchestrator {
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// The discovery window, dropping it once expired
    fn active_discovery(&mut self) -> Option<&DiscoveryWindow> {
        if self.discovery.as_ref().is_some_and(DiscoveryWindow::expired) {
            info!("discovery window expired");
            self.discovery = None;
        }
        self.discovery.as_ref()
    }

    fn spawn_device(&mut self, id: &str, config: DeviceConfig) {
        let args = DeviceActorArgs {
            id: id.to_string(),
            config: config.clone(),
            ctx: self.ctx.clone(),
        };
        let actor_ref = DeviceActor::spawn(args);
        info!(device = %id, "spawned DeviceActor");

        self.devices.insert(id.to_string(), actor_ref);
        self.configs.insert(id.to_string(), config);
    }

    /// Stop a device actor, waiting for its control loop
    async fn stop_device(id: &str, actor_ref: &ActorRef<DeviceActor>) {
        if let Err(e) = actor_ref.ask(StopDevice).await {
            warn!(device = %id, error = %e, "failed to stop device");
        }
        actor_ref.stop_gracefully().await.ok();
        info!(device = %id, "stopped DeviceActor");
    }

    /// Hand a new configuration to an existing actor, or spawn one
    async fn apply_config(&mut self, id: &str, config: DeviceConfig) -> Result<(), CoreError> {
        let Some(actor_ref) = self.devices.get(id) else {
            self.spawn_device(id, config);
            return Ok(());
        };

        actor_ref
            .ask(ConfigChanged {
                config: config.clone(),
            })
            .await
            .map_err(ask_error)?;
        self.configs.insert(id.to_string(), config);
        Ok(())
    }

    /// Match the device actors to `doc`
    async fn reconcile(&mut self, doc: &FleetDocument) -> Result<ReloadSummary, CoreError> {
        self.ctx.pdus.sync(&doc.pdus);
        let mut summary = ReloadSummary::default();

        let gone: Vec<String> = self
            .devices
            .keys()
            .filter(|id| !doc.duts.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(actor_ref) = self.devices.remove(&id) {
                Self::stop_device(&id, &actor_ref).await;
            }
            if let Some(config) = self.configs.remove(&id) {
                forge::remove_device_runners(self.ctx.forge.as_ref(), doc, &id, &config).await;
            }
            summary.removed.push(id);
        }

        for (id, config) in &doc.duts {
            let known = self.devices.contains_key(id);
            let changed = self.configs.get(id) != Some(config);
            // PDUs may have been recreated, so every actor drops its port
            self.apply_config(id, config.clone()).await?;

            if !known {
                summary.created.push(id.clone());
            } else if changed {
                summary.updated.push(id.clone());
            }
        }

        Ok(summary)
    }

    /// Find a device by id or full name
    fn resolve(&self, id_or_name: &str) -> Result<(String, ActorRef<DeviceActor>), CoreError> {
        if let Some(actor_ref) = self.devices.get(id_or_name) {
            return Ok((id_or_name.to_string(), actor_ref.clone()));
        }

        let farm = self.ctx.farm_name();
        let id = self
            .ctx
            .store
            .read(|doc| doc.resolve_id(farm, id_or_name))?
            .ok_or_else(|| not_found(id_or_name))?;
        let actor_ref = self.devices.get(&id).ok_or_else(|| not_found(id_or_name))?;
        Ok((id, actor_ref.clone()))
    }

    /// Create or merge a device in the store, then update its actor
    async fn add_or_update(
        &mut self,
        id: &str,
        update: &DeviceUpdate,
    ) -> Result<DiscoverOutcome, CoreError> {
        let (created, config) = self.ctx.store.with_lock(|doc| {
            let created = !doc.duts.contains_key(id);
            if created {
                let (Some(base_name), Some(ip_address)) = (&update.base_name, &update.ip_address)
                else {
                    return Err(CoreError::ConfigError(
                        "a new device needs a base_name and an ip_address".to_string(),
                    ));
                };
                doc.duts.insert(
                    id.to_string(),
                    DeviceConfig::new(base_name.clone(), ip_address.clone()),
                );
            }

            let config = doc.duts.get_mut(id).ok_or_else(|| not_found(id))?;
            apply_update(config, update);
            config.validate().map_err(CoreError::ConfigError)?;
            Ok::<_, CoreError>((created, config.clone()))
        })?;

        self.apply_config(id, config).await?;

        if created {
            info!(device = %id, "device added");
            Ok(DiscoverOutcome::Created { id: id.to_string() })
        } else {
            info!(device = %id, "device updated");
            Ok(DiscoverOutcome::Updated { id: id.to_string() })
        }
    }

    /// Whether a device is wired to the port, and if so whether it is retired
    fn port_assignment(&self, pdu: &str, port_id: &str) -> Result<Option<(String, bool)>, CoreError> {
        Ok(self.ctx.store.read(|doc| {
            doc.device_on_port(pdu, port_id)
                .map(|(id, device)| (id.clone(), device.is_retired))
        })?)
    }

    async fn device_statuses(&self) -> BTreeMap<String, DeviceStatus> {
        let mut statuses = BTreeMap::new();

        for (id, actor_ref) in &self.devices {
            match actor_ref.ask(GetDeviceStatus).await {
                Ok(status) => {
                    statuses.insert(id.clone(), status);
                }
                Err(e) => {
                    warn!(device = %id, error = %e, "failed to get device status");
                }
            }
        }

        statuses
    }

    async fn pdu_snapshots(&self) -> BTreeMap<String, PduSnapshot> {
        let mut snapshots = BTreeMap::new();
        for name in self.ctx.pdus.names() {
            match self.ctx.pdus.snapshot(&name).await {
                Ok(snapshot) => {
                    snapshots.insert(name, snapshot);
                }
                Err(e) => warn!(pdu = %name, error = %e, "failed to get pdu snapshot"),
            }
        }
        snapshots
    }
}

impl Actor for FleetOrchestrator {
    type Args = FleetOrchestratorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), farm = %args.ctx.farm_name(), "FleetOrchestrator starting");

        let mut orchestrator = Self {
            ctx: args.ctx,
            devices: BTreeMap::new(),
            configs: BTreeMap::new(),
            discovery: None,
        };

        let doc = orchestrator.ctx.store.snapshot()?;
        let summary = orchestrator.reconcile(&doc).await?;
        info!(devices = summary.created.len(), "fleet loaded");

        Ok(orchestrator)
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "FleetOrchestrator stopping");

        for (id, actor_ref) in &self.devices {
            Self::stop_device(id, actor_ref).await;
        }

        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<ReloadFleet> for FleetOrchestrator {
    type Reply = Result<ReloadSummary, CoreError>;

    async fn handle(
        &mut self,
        _msg: ReloadFleet,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.ctx.store.reload()?;
        let doc = self.ctx.store.snapshot()?;
        let summary = self.reconcile(&doc).await?;

        if summary != ReloadSummary::default() {
            info!(
                created = ?summary.created,
                updated = ?summary.updated,
                removed = ?summary.removed,
                "fleet reloaded"
            );
        }
        Ok(summary)
    }
}

impl Message<Discover> for FleetOrchestrator {
    type Reply = Result<DiscoverOutcome, CoreError>;

    async fn handle(&mut self, msg: Discover, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let mut update = msg.update;
        let id = update
            .id
            .clone()
            .or_else(|| update.mac_address.clone())
            .ok_or_else(|| {
                CoreError::ConfigError("a device needs an id or a mac_address".to_string())
            })?;

        let known = self.ctx.store.read(|doc| doc.duts.contains_key(&id))?;
        if !known {
            if let Some(window) = self.active_discovery().cloned() {
                self.discovery = None;

                match self.ctx.pdus.port(&window.pdu, &window.port_id).await {
                    Ok(_) => {
                        let pdu = self.ctx.pdus.get(&window.pdu)?;
                        update.pdu = Some(window.pdu.clone());
                        update.pdu_port_id = Some(window.port_id.clone());
                        update.pdu_off_delay = Some(pdu.default_min_off_time().as_secs_f64());
                        info!(device = %id, pdu = %window.pdu, port = %window.port_id, "device discovered");
                    }
                    Err(e) => {
                        error!(
                            device = %id,
                            pdu = %window.pdu,
                            port = %window.port_id,
                            error = %e,
                            "discovery port is gone, adding the device without it"
                        );
                    }
                }

                return self.add_or_update(&id, &update).await;
            }

            warn!(device = %id, "new device found, despite no discovery in progress");
        }

        if msg.update_if_exists {
            self.add_or_update(&id, &update).await
        } else {
            Ok(DiscoverOutcome::Ignored { id })
        }
    }
}

impl Message<ArmDiscovery> for FleetOrchestrator {
    type Reply = Result<DiscoveryStatus, CoreError>;

    async fn handle(
        &mut self,
        msg: ArmDiscovery,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let request = msg.request;
        if self.active_discovery().is_some() {
            return Err(CoreError::Conflict(
                "a discovery is already in progress".to_string(),
            ));
        }

        let port = self.ctx.pdus.port(&request.pdu, &request.port_id).await?;
        if let Some((device, _)) = self.port_assignment(&request.pdu, &request.port_id)? {
            return Err(CoreError::ConfigError(format!(
                "port {}/{} is already assigned to {device}",
                request.pdu, request.port_id
            )));
        }
        if port.get().await? == PortState::On {
            return Err(CoreError::Conflict(format!(
                "port {}/{} is already in use",
                request.pdu, request.port_id
            )));
        }
        if port.is_reserved() {
            return Err(CoreError::Reserved(format!(
                "port {}/{}",
                request.pdu, request.port_id
            )));
        }

        port.set(PortState::On).await?;
        if port.get().await? != PortState::On {
            return Err(CoreError::Transport(format!(
                "failed to turn on port {}/{}",
                request.pdu, request.port_id
            )));
        }

        let timeout = request
            .timeout
            .map_or(DEFAULT_DISCOVERY_TIMEOUT, Duration::from_secs);
        let window = DiscoveryWindow {
            pdu: request.pdu,
            port_id: request.port_id,
            armed_at: Utc::now(),
            opened: Instant::now(),
            timeout,
        };
        info!(pdu = %window.pdu, port = %window.port_id, ?timeout, "discovery armed");

        let status = window.status();
        self.discovery = Some(window);
        Ok(status)
    }
}

impl Message<GetDiscovery> for FleetOrchestrator {
    type Reply = Result<Option<DiscoveryStatus>, CoreError>;

    async fn handle(
        &mut self,
        _msg: GetDiscovery,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.active_discovery().map(DiscoveryWindow::status))
    }
}

impl Message<CancelDiscovery> for FleetOrchestrator {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        _msg: CancelDiscovery,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let Some(window) = self.active_discovery().cloned() else {
            return Err(CoreError::ConfigError(
                "there is no discovery in progress".to_string(),
            ));
        };
        self.discovery = None;
        info!(pdu = %window.pdu, port = %window.port_id, "discovery cancelled");

        let port = self.ctx.pdus.port(&window.pdu, &window.port_id).await?;
        if port.is_reserved() {
            return Err(CoreError::Reserved(format!(
                "port {}/{}",
                window.pdu, window.port_id
            )));
        }
        if let Some((device, _)) = self.port_assignment(&window.pdu, &window.port_id)? {
            return Err(CoreError::ConfigError(format!(
                "port {}/{} is already assigned to {device}",
                window.pdu, window.port_id
            )));
        }

        port.set(PortState::Off).await?;
        Ok(())
    }
}

impl Message<ListDevices> for FleetOrchestrator {
    type Reply = Result<DeviceListResponse, CoreError>;

    async fn handle(
        &mut self,
        _msg: ListDevices,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(DeviceListResponse {
            duts: self.device_statuses().await,
        })
    }
}

impl Message<GetDevice> for FleetOrchestrator {
    type Reply = Result<DeviceStatus, CoreError>;

    async fn handle(&mut self, msg: GetDevice, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let (_, actor_ref) = self.resolve(&msg.id)?;
        actor_ref.ask(GetDeviceStatus).await.map_err(ask_error)
    }
}

impl Message<GetDeviceRef> for FleetOrchestrator {
    type Reply = Result<ActorRef<DeviceActor>, CoreError>;

    async fn handle(
        &mut self,
        msg: GetDeviceRef,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.resolve(&msg.id).map(|(_, actor_ref)| actor_ref)
    }
}

impl Message<RemoveDevice> for FleetOrchestrator {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: RemoveDevice,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let (id, actor_ref) = self.resolve(&msg.id)?;

        self.devices.remove(&id);
        self.configs.remove(&id);
        Self::stop_device(&id, &actor_ref).await;

        let removed = self
            .ctx
            .store
            .with_lock(|doc| Ok::<_, CoreError>(doc.duts.remove(&id)))?;
        if let Some(config) = removed {
            let doc = self.ctx.store.snapshot()?;
            forge::remove_device_runners(self.ctx.forge.as_ref(), &doc, &id, &config).await;
        }

        info!(device = %id, "device removed");
        Ok(())
    }
}

impl Message<PatchDevice> for FleetOrchestrator {
    type Reply = Result<DeviceConfig, CoreError>;

    async fn handle(
        &mut self,
        msg: PatchDevice,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let (id, actor_ref) = self.resolve(&msg.id)?;
        let config = actor_ref
            .ask(UpdateDeviceFields { patch: msg.patch })
            .await
            .map_err(ask_error)?;
        self.configs.insert(id, config.clone());
        Ok(config)
    }
}

impl Message<QueueDeviceQuickCheck> for FleetOrchestrator {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: QueueDeviceQuickCheck,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let (_, actor_ref) = self.resolve(&msg.id)?;
        actor_ref.ask(QueueQuickCheck).await.map_err(ask_error)
    }
}

impl Message<GetDeviceQuickCheck> for FleetOrchestrator {
    type Reply = Result<bool, CoreError>;

    async fn handle(
        &mut self,
        msg: GetDeviceQuickCheck,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let (_, actor_ref) = self.resolve(&msg.id)?;
        actor_ref.ask(GetQuickCheck).await.map_err(ask_error)
    }
}

impl Message<CancelDeviceJob> for FleetOrchestrator {
    type Reply = Result<bool, CoreError>;

    async fn handle(
        &mut self,
        msg: CancelDeviceJob,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let (id, actor_ref) = self.resolve(&msg.id)?;

        let state = actor_ref.ask(GetDeviceState).await.map_err(ask_error)?;
        if state != DeviceState::Running {
            return Err(CoreError::ConfigError(format!(
                "device {id} isn't running a job, current state is {state}"
            )));
        }

        actor_ref.ask(CancelJob).await.map_err(ask_error)
    }
}

impl Message<GetDeviceBootConfig> for FleetOrchestrator {
    type Reply = Result<BootConfig, CoreError>;

    async fn handle(
        &mut self,
        msg: GetDeviceBootConfig,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let (_, actor_ref) = self.resolve(&msg.id)?;
        let served = actor_ref
            .ask(GetBootConfig { query: msg.query })
            .await
            .map_err(ask_error)?;
        Ok(served.unwrap_or_else(|| self.ctx.settings.boot.to_config()))
    }
}

impl Message<ListPdus> for FleetOrchestrator {
    type Reply = Result<PduListResponse, CoreError>;

    async fn handle(&mut self, _msg: ListPdus, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        Ok(PduListResponse {
            pdus: self.pdu_snapshots().await,
        })
    }
}

impl Message<GetPdu> for FleetOrchestrator {
    type Reply = Result<PduSnapshot, CoreError>;

    async fn handle(&mut self, msg: GetPdu, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.ctx.pdus.snapshot(&msg.name).await
    }
}

impl Message<GetPort> for FleetOrchestrator {
    type Reply = Result<PortSnapshot, CoreError>;

    async fn handle(&mut self, msg: GetPort, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let port = self.ctx.pdus.port(&msg.pdu, &msg.port_id).await?;
        if let Err(e) = port.get().await {
            warn!(pdu = %msg.pdu, port = %msg.port_id, error = %e, "port poll failed");
        }
        Ok(port.snapshot())
    }
}

impl Message<PatchPort> for FleetOrchestrator {
    type Reply = Result<PortSnapshot, CoreError>;

    async fn handle(&mut self, msg: PatchPort, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let PatchPort {
            pdu: pdu_name,
            port_id,
            patch,
        } = msg;
        let pdu = self.ctx.pdus.get(&pdu_name)?;
        let port = pdu.port(&port_id).await?;

        if port.is_reserved() && patch.reserved.is_none() {
            return Err(CoreError::Reserved(format!("port {port_id} on pdu {pdu_name}")));
        }

        if let Some((device, retired)) = self.port_assignment(&pdu_name, &port_id)?
            && !(retired && patch.state.is_some())
        {
            return Err(CoreError::ConfigError(format!(
                "port {port_id} on pdu {pdu_name} is in use by {device}"
            )));
        }

        if let Some(state) = &patch.state {
            let state = match state.to_ascii_uppercase().as_str() {
                "ON" => PortState::On,
                "OFF" => PortState::Off,
                _ => {
                    return Err(CoreError::ConfigError(format!(
                        "invalid port state {state}, valid states are ON and OFF"
                    )));
                }
            };
            port.set(state).await?;
            return Ok(port.snapshot());
        }

        if let Some(reserved) = patch.reserved {
            self.ctx.store.with_lock(|doc| {
                let config = doc
                    .pdus
                    .get_mut(&pdu_name)
                    .ok_or_else(|| CoreError::NotFound(format!("pdu {pdu_name}")))?;
                if reserved {
                    config.reserved_port_ids.insert(port_id.clone());
                } else {
                    config.reserved_port_ids.remove(&port_id);
                }
                Ok::<_, CoreError>(())
            })?;

            let changed = if reserved {
                pdu.reserve_port(&port_id)
            } else {
                pdu.unreserve_port(&port_id)
            };
            info!(pdu = %pdu_name, port = %port_id, reserved, changed, "port reservation updated");
        }

        Ok(port.snapshot())
    }
}

impl Message<FullState> for FleetOrchestrator {
    type Reply = Result<FullStateResponse, CoreError>;

    async fn handle(&mut self, _msg: FullState, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let discover = self.active_discovery().map(DiscoveryWindow::status);
        Ok(FullStateResponse {
            pdus: self.pdu_snapshots().await,
            duts: self.device_statuses().await,
            discover,
            now: Utc::now(),
        })
    }
}

impl Message<ListCandidates> for FleetOrchestrator {
    type Reply = Result<CandidateList, CoreError>;

    async fn handle(
        &mut self,
        _msg: ListCandidates,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let doc = self.ctx.store.snapshot()?;
        let farm = self.ctx.farm_name();
        let mut candidates = Vec::with_capacity(self.devices.len());

        for (id, actor_ref) in &self.devices {
            let Some(config) = doc.duts.get(id) else {
                continue;
            };
            let state = match actor_ref.ask(GetDeviceState).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(device = %id, error = %e, "failed to get device state");
                    continue;
                }
            };

            let candidate = DeviceCandidate {
                id: id.clone(),
                full_name: doc.full_name(farm, id).unwrap_or_else(|| id.clone()),
                all_tags: config.all_tags(farm),
                is_retired: config.is_retired,
                state,
            };
            candidates.push((candidate, actor_ref.clone()));
        }

        Ok(candidates)
    }
}
