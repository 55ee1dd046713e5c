//! `Pdu`: a power switch and its ports

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use labfleet_api::responses::PduSnapshot;
use tracing::{info, warn};

use crate::error::PowerError;
use crate::port::PowerPort;
use crate::traits::PduDriver;

/// A power switch with a lazily-enumerated, then fixed, set of ports
pub struct Pdu {
    name: String,
    driver: Arc<dyn PduDriver>,
    reservations: Arc<RwLock<BTreeSet<String>>>,
    ports: tokio::sync::Mutex<Option<BTreeMap<String, Arc<PowerPort>>>>,
    last_error: Mutex<Option<String>>,
}

impl Pdu {
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn PduDriver>,
        reserved_port_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            reservations: Arc::new(RwLock::new(reserved_port_ids.into_iter().collect())),
            ports: tokio::sync::Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn driver_name(&self) -> &'static str {
        self.driver.driver_name()
    }

    #[must_use]
    pub fn default_min_off_time(&self) -> Duration {
        self.driver.default_min_off_time()
    }

    /// Error from the last failed port enumeration, cleared on success
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// All ports, enumerating them on first use
    ///
    /// # Errors
    /// Returns the driver's error when enumeration fails; it is retried on the
    /// next call.
    pub async fn ports(&self) -> Result<Vec<Arc<PowerPort>>, PowerError> {
        let mut cache = self.ports.lock().await;

        if let Some(ports) = cache.as_ref() {
            return Ok(ports.values().cloned().collect());
        }

        match self.driver.ports().await {
            Ok(infos) => {
                let ports: BTreeMap<String, Arc<PowerPort>> = infos
                    .into_iter()
                    .map(|info| {
                        let port = PowerPort::new(
                            self.name.clone(),
                            info.port_id.clone(),
                            info.label,
                            self.driver.clone(),
                            self.reservations.clone(),
                        );
                        (info.port_id, Arc::new(port))
                    })
                    .collect();

                info!(pdu = %self.name, ports = ports.len(), "ports enumerated");
                self.set_last_error(None);
                let list = ports.values().cloned().collect();
                *cache = Some(ports);
                Ok(list)
            }
            Err(e) => {
                warn!(pdu = %self.name, error = %e, "failed to enumerate ports");
                self.set_last_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Look up a single port
    ///
    /// # Errors
    /// Returns `PowerError::UnknownPort` or the enumeration error.
    pub async fn port(&self, port_id: &str) -> Result<Arc<PowerPort>, PowerError> {
        self.ports()
            .await?
            .into_iter()
            .find(|p| p.port_id() == port_id)
            .ok_or_else(|| PowerError::UnknownPort(format!("{}/{port_id}", self.name)))
    }

    #[must_use]
    pub fn is_reserved(&self, port_id: &str) -> bool {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(port_id)
    }

    /// Reserve a port; returns whether the set changed
    pub fn reserve_port(&self, port_id: &str) -> bool {
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port_id.to_string())
    }

    /// Release a port; returns whether the set changed
    pub fn unreserve_port(&self, port_id: &str) -> bool {
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(port_id)
    }

    /// Replace the reservation set, e.g. after the fleet store was reloaded
    pub fn set_reserved_port_ids(&self, port_ids: impl IntoIterator<Item = String>) {
        *self
            .reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner) = port_ids.into_iter().collect();
    }

    #[must_use]
    pub fn reserved_port_ids(&self) -> BTreeSet<String> {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn snapshot(&self) -> PduSnapshot {
        match self.ports().await {
            Ok(ports) => PduSnapshot {
                driver: self.driver_name().to_string(),
                ports: ports
                    .iter()
                    .map(|p| (p.port_id().to_string(), p.snapshot()))
                    .collect(),
                state: "READY".to_string(),
                error: None,
            },
            Err(e) => PduSnapshot {
                driver: self.driver_name().to_string(),
                ports: BTreeMap::new(),
                state: "ERROR".to_string(),
                error: Some(e.to_string()),
            },
        }
    }
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pdu")
            .field("name", &self.name)
            .field("driver", &self.driver_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use labfleet_api::PortState;

    use super::*;
    use crate::dummy::DummyDriver;

    #[tokio::test]
    async fn test_ports_are_cached() {
        let pdu = Pdu::new("pdu-1", Arc::new(DummyDriver::new(3)), Vec::new());

        let first = pdu.port("2").await.unwrap();
        let second = pdu.port("2").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.label(), Some("outlet 2"));
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_reported_then_retried() {
        let driver = Arc::new(DummyDriver::new(2));
        driver.set_unreachable(true);
        let pdu = Pdu::new("pdu-1", driver.clone(), Vec::new());

        let snapshot = pdu.snapshot().await;
        assert_eq!(snapshot.state, "ERROR");
        assert!(pdu.last_error().is_some());

        driver.set_unreachable(false);
        let snapshot = pdu.snapshot().await;
        assert_eq!(snapshot.state, "READY");
        assert_eq!(snapshot.ports.len(), 2);
        assert!(pdu.last_error().is_none());
    }

    #[tokio::test]
    async fn test_reservation_is_shared_with_ports() {
        let driver = Arc::new(DummyDriver::new(2));
        let pdu = Pdu::new("pdu-1", driver.clone(), vec!["1".to_string()]);
        let port = pdu.port("1").await.unwrap();

        port.set(PortState::On).await.unwrap();
        assert!(driver.set_calls().is_empty());

        assert!(pdu.unreserve_port("1"));
        assert!(!port.is_reserved());
        port.set(PortState::On).await.unwrap();
        assert_eq!(driver.set_calls(), vec![("1".to_string(), PortState::On)]);
    }

    #[tokio::test]
    async fn test_unknown_port() {
        let pdu = Pdu::new("pdu-1", Arc::new(DummyDriver::new(1)), Vec::new());
        assert!(matches!(
            pdu.port("9").await,
            Err(PowerError::UnknownPort(_))
        ));
    }
}
