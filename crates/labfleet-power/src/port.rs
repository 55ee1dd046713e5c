//! `PowerPort`: one switchable outlet
//!
//! Enforces the minimum off-time between a shutdown and the next power-on,
//! and refuses to touch reserved ports.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use labfleet_api::PortState;
use labfleet_api::responses::PortSnapshot;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::PowerError;
use crate::traits::PduDriver;

/// Observed history of a port, handed to job runners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub last_polled: Option<DateTime<Utc>>,
    pub last_known_state: PortState,
    pub last_shutdown: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Observations {
    min_off_time: Duration,
    last_known_state: PortState,
    last_shutdown: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_shutdown`, used for the off-time wait
    last_shutdown_at: Option<Instant>,
    last_polled: Option<DateTime<Utc>>,
}

/// A single outlet of a power switch
pub struct PowerPort {
    pdu_name: String,
    port_id: String,
    label: Option<String>,
    driver: Arc<dyn PduDriver>,
    /// Reservation set shared with the owning `Pdu`
    reservations: Arc<RwLock<BTreeSet<String>>>,
    observed: Mutex<Observations>,
    /// Serializes state changes so two callers never race an OFF->ON
    op_lock: tokio::sync::Mutex<()>,
}

impl PowerPort {
    pub(crate) fn new(
        pdu_name: impl Into<String>,
        port_id: impl Into<String>,
        label: Option<String>,
        driver: Arc<dyn PduDriver>,
        reservations: Arc<RwLock<BTreeSet<String>>>,
    ) -> Self {
        let min_off_time = driver.default_min_off_time();
        Self {
            pdu_name: pdu_name.into(),
            port_id: port_id.into(),
            label,
            driver,
            reservations,
            observed: Mutex::new(Observations {
                min_off_time,
                last_known_state: PortState::Unknown,
                last_shutdown: None,
                last_shutdown_at: None,
                last_polled: None,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn observed(&self) -> MutexGuard<'_, Observations> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn pdu_name(&self) -> &str {
        &self.pdu_name
    }

    #[must_use]
    pub fn port_id(&self) -> &str {
        &self.port_id
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn min_off_time(&self) -> Duration {
        self.observed().min_off_time
    }

    /// Override the off-time, typically with the owning device's `pdu_off_delay`
    pub fn set_min_off_time(&self, min_off_time: Duration) {
        self.observed().min_off_time = min_off_time;
    }

    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&self.port_id)
    }

    #[must_use]
    pub fn last_known_state(&self) -> PortState {
        self.observed().last_known_state
    }

    #[must_use]
    pub fn last_shutdown(&self) -> Option<DateTime<Utc>> {
        self.observed().last_shutdown
    }

    #[must_use]
    pub fn stats(&self) -> PortStats {
        let observed = self.observed();
        PortStats {
            last_polled: observed.last_polled,
            last_known_state: observed.last_known_state,
            last_shutdown: observed.last_shutdown,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PortSnapshot {
        let reserved = self.is_reserved();
        let observed = self.observed();
        PortSnapshot {
            label: self.label.clone(),
            min_off_time: observed.min_off_time.as_secs_f64(),
            state: observed.last_known_state,
            last_shutdown: observed.last_shutdown,
            last_polled: observed.last_polled,
            reserved,
        }
    }

    /// Record an observed state
    ///
    /// Any transition into OFF restarts the off-time, whether it came from
    /// `set` or from polling.
    fn record(&self, state: PortState) {
        let mut observed = self.observed();
        if state == PortState::Off && observed.last_known_state != PortState::Off {
            observed.last_shutdown = Some(Utc::now());
            observed.last_shutdown_at = Some(Instant::now());
        }
        observed.last_known_state = state;
    }

    /// Instant before which the port must not be powered on
    fn earliest_power_on(&self) -> Option<Instant> {
        let observed = self.observed();
        observed
            .last_shutdown_at
            .map(|at| at + observed.min_off_time)
    }

    /// Drive the port to `state`
    ///
    /// Does nothing on a reserved port or when the port is already known to
    /// be in `state`. Powering on waits out the remaining off-time first.
    ///
    /// # Errors
    /// Returns the driver's error, or `PowerError::Rejected` when the switch
    /// refused the change.
    pub async fn set(&self, state: PortState) -> Result<(), PowerError> {
        let _guard = self.op_lock.lock().await;

        if self.is_reserved() {
            debug!(pdu = %self.pdu_name, port = %self.port_id, %state, "port reserved, ignoring");
            return Ok(());
        }

        if self.last_known_state() == state {
            return Ok(());
        }

        if state == PortState::On
            && let Some(ready_at) = self.earliest_power_on()
            && Instant::now() < ready_at
        {
            info!(
                pdu = %self.pdu_name,
                port = %self.port_id,
                wait = ?(ready_at - Instant::now()),
                "waiting for the minimum off time before powering on"
            );
            tokio::time::sleep_until(ready_at).await;
        }

        if !self.driver.set_port_state(&self.port_id, state).await? {
            return Err(PowerError::Rejected {
                port_id: self.port_id.clone(),
                state: state.to_string(),
            });
        }

        info!(pdu = %self.pdu_name, port = %self.port_id, %state, "port state changed");
        self.record(state);
        Ok(())
    }

    /// Poll the switch for the current state
    ///
    /// # Errors
    /// Returns the driver's error; the last known state is left untouched.
    pub async fn get(&self) -> Result<PortState, PowerError> {
        let state = self.driver.get_port_state(&self.port_id).await?;
        self.observed().last_polled = Some(Utc::now());
        self.record(state);
        Ok(state)
    }
}

impl std::fmt::Debug for PowerPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerPort")
            .field("pdu_name", &self.pdu_name)
            .field("port_id", &self.port_id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
