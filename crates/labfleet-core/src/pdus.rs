//! Live power switches, rebuilt from the fleet document

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use labfleet_api::responses::PduSnapshot;
use labfleet_power::{DriverRegistry, Pdu, PowerPort};
use tracing::{error, info};

use crate::config::PduConfig;
use crate::error::CoreError;

#[derive(Debug)]
enum PduEntry {
    Ready { config: PduConfig, pdu: Arc<Pdu> },
    /// The driver could not be created from the configuration
    Failed { config: PduConfig, error: String },
}

impl PduEntry {
    fn config(&self) -> &PduConfig {
        match self {
            PduEntry::Ready { config, .. } | PduEntry::Failed { config, .. } => config,
        }
    }
}

/// Every configured PDU, keyed by name
#[derive(Debug)]
pub struct PduRegistry {
    drivers: DriverRegistry,
    entries: RwLock<BTreeMap<String, PduEntry>>,
}

impl PduRegistry {
    #[must_use]
    pub fn new(drivers: DriverRegistry) -> Self {
        Self {
            drivers,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn create(&self, name: &str, config: &PduConfig) -> PduEntry {
        match self.drivers.create(&config.driver, &config.config) {
            Ok(driver) => {
                info!(pdu = %name, driver = %config.driver, "pdu created");
                let pdu = Pdu::new(name, driver, config.reserved_port_ids.iter().cloned());
                PduEntry::Ready {
                    config: config.clone(),
                    pdu: Arc::new(pdu),
                }
            }
            Err(e) => {
                error!(pdu = %name, driver = %config.driver, error = %e, "failed to create pdu");
                PduEntry::Failed {
                    config: config.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Match the live PDUs to `configs`
    ///
    /// A PDU whose driver settings changed is recreated, which drops its
    /// port history. A change limited to reservations is applied in place.
    pub fn sync(&self, configs: &BTreeMap<String, PduConfig>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        entries.retain(|name, _| {
            let keep = configs.contains_key(name);
            if !keep {
                info!(pdu = %name, "pdu removed");
            }
            keep
        });

        for (name, config) in configs {
            let unchanged_driver = entries.get(name).is_some_and(|entry| {
                let old = entry.config();
                old.driver == config.driver && old.config == config.config
            });

            if unchanged_driver {
                if let Some(PduEntry::Ready { config: old, pdu }) = entries.get_mut(name)
                    && old.reserved_port_ids != config.reserved_port_ids
                {
                    pdu.set_reserved_port_ids(config.reserved_port_ids.iter().cloned());
                    old.reserved_port_ids.clone_from(&config.reserved_port_ids);
                }
            } else {
                let entry = self.create(name, config);
                entries.insert(name.clone(), entry);
            }
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// # Errors
    /// Returns `CoreError::NotFound` for an unknown PDU and
    /// `CoreError::ConfigError` for one whose driver failed to load.
    pub fn get(&self, name: &str) -> Result<Arc<Pdu>, CoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(name) {
            Some(PduEntry::Ready { pdu, .. }) => Ok(pdu.clone()),
            Some(PduEntry::Failed { error, .. }) => Err(CoreError::ConfigError(format!(
                "pdu {name} is unusable: {error}"
            ))),
            None => Err(CoreError::NotFound(format!("pdu {name}"))),
        }
    }

    /// # Errors
    /// Returns `CoreError::NotFound` for an unknown PDU or port, or the
    /// enumeration error.
    pub async fn port(&self, pdu: &str, port_id: &str) -> Result<Arc<PowerPort>, CoreError> {
        let pdu = self.get(pdu)?;
        Ok(pdu.port(port_id).await?)
    }

    /// # Errors
    /// Returns `CoreError::NotFound` for an unknown PDU.
    pub async fn snapshot(&self, name: &str) -> Result<PduSnapshot, CoreError> {
        let failed = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(name) {
                Some(PduEntry::Ready { pdu, .. }) => Ok(pdu.clone()),
                Some(PduEntry::Failed { config, error }) => Err(PduSnapshot {
                    driver: config.driver.clone(),
                    ports: BTreeMap::new(),
                    state: "ERROR".to_string(),
                    error: Some(error.clone()),
                }),
                None => return Err(CoreError::NotFound(format!("pdu {name}"))),
            }
        };

        match failed {
            Ok(pdu) => Ok(pdu.snapshot().await),
            Err(snapshot) => Ok(snapshot),
        }
    }

    pub async fn snapshots(&self) -> BTreeMap<String, PduSnapshot> {
        let mut snapshots = BTreeMap::new();
        for name in self.names() {
            if let Ok(snapshot) = self.snapshot(&name).await {
                snapshots.insert(name, snapshot);
            }
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;

    fn dummy(ports: usize, reserved: &[&str]) -> PduConfig {
        PduConfig {
            driver: "dummy".to_string(),
            config: json!({"ports": ports}),
            reserved_port_ids: reserved.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn test_sync_creates_updates_and_removes() {
        let registry = PduRegistry::new(DriverRegistry::with_builtin());
        let mut configs = BTreeMap::new();
        configs.insert("a".to_string(), dummy(2, &[]));
        configs.insert("b".to_string(), dummy(4, &[]));
        registry.sync(&configs);

        let first = registry.get("a").unwrap();
        assert_eq!(registry.snapshot("b").await.unwrap().ports.len(), 4);

        configs.insert("a".to_string(), dummy(2, &["1"]));
        configs.remove("b");
        registry.sync(&configs);

        let same = registry.get("a").unwrap();
        assert!(Arc::ptr_eq(&first, &same));
        assert_eq!(same.reserved_port_ids(), BTreeSet::from(["1".to_string()]));
        assert!(matches!(registry.get("b"), Err(CoreError::NotFound(_))));

        configs.insert("a".to_string(), dummy(3, &["1"]));
        registry.sync(&configs);
        assert!(!Arc::ptr_eq(&first, &registry.get("a").unwrap()));
    }

    #[tokio::test]
    async fn test_broken_driver_is_reported() {
        let registry = PduRegistry::new(DriverRegistry::with_builtin());
        let mut configs = BTreeMap::new();
        configs.insert(
            "apc".to_string(),
            PduConfig {
                driver: "apc_masterswitch".to_string(),
                config: serde_json::Value::Null,
                reserved_port_ids: BTreeSet::new(),
            },
        );
        registry.sync(&configs);

        assert!(matches!(registry.get("apc"), Err(CoreError::ConfigError(_))));
        let snapshots = registry.snapshots().await;
        assert_eq!(snapshots["apc"].state, "ERROR");
        assert!(snapshots["apc"].error.is_some());
    }
}
