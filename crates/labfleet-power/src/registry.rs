//! Driver selection by name

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::command::CommandDriver;
use crate::dummy::DummyDriver;
use crate::error::PowerError;
use crate::traits::PduDriver;

/// Builds a driver from its JSON configuration
pub type DriverFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn PduDriver>, PowerError> + Send + Sync>;

/// Maps driver names, as written in the fleet store, to constructors
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Registry with no drivers at all
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the `dummy` and `command` drivers
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("dummy", |config| {
            Ok(Arc::new(DummyDriver::from_config(config)?) as Arc<dyn PduDriver>)
        });
        registry.register("command", |config| {
            Ok(Arc::new(CommandDriver::from_config(config)?) as Arc<dyn PduDriver>)
        });
        registry
    }

    /// Add or replace a driver
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn PduDriver>, PowerError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Instantiate the driver registered under `name`
    ///
    /// # Errors
    /// Returns `PowerError::UnknownDriver`, or the driver's configuration error.
    pub fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn PduDriver>, PowerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PowerError::UnknownDriver(name.to_string()))?;
        factory(config)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_drivers() {
        let registry = DriverRegistry::with_builtin();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["command", "dummy"]);

        let driver = registry.create("dummy", &serde_json::json!({"ports": 2})).unwrap();
        assert_eq!(driver.driver_name(), "dummy");
    }

    #[test]
    fn test_unknown_driver() {
        let registry = DriverRegistry::with_builtin();
        let err = registry.create("apc_masterswitch", &serde_json::Value::Null).err().unwrap();
        assert!(matches!(err, PowerError::UnknownDriver(_)));
    }

    #[test]
    fn test_register_custom_driver() {
        let mut registry = DriverRegistry::empty();
        registry.register("lab", |_| Ok(Arc::new(DummyDriver::new(1)) as Arc<dyn PduDriver>));
        assert!(registry.contains("lab"));
        assert!(!registry.contains("dummy"));
    }
}
