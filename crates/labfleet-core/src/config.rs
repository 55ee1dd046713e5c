//! Persisted fleet document: PDUs, devices and forges

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token stored until a runner was successfully registered
pub const INVALID_TOKEN: &str = "<invalid default>";

/// Shortest string accepted as a forge token
const MIN_TOKEN_LEN: usize = 8;

/// Whether a token is worth sending to a forge
#[must_use]
pub fn token_looks_valid(token: &str) -> bool {
    token != INVALID_TOKEN && token.len() >= MIN_TOKEN_LEN
}

/// Whether `value` is a colon-separated 48-bit MAC address
#[must_use]
pub fn looks_like_mac(value: &str) -> bool {
    let groups: Vec<&str> = value.split(':').collect();
    groups.len() == 6
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// The whole fleet, as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetDocument {
    #[serde(default)]
    pub pdus: BTreeMap<String, PduConfig>,
    #[serde(default)]
    pub duts: BTreeMap<String, DeviceConfig>,
    #[serde(default)]
    pub gitlab: BTreeMap<String, ForgeConfig>,
}

impl FleetDocument {
    /// Check every entry, naming the first offender
    ///
    /// # Errors
    /// Returns a description of the first invalid entry.
    pub fn validate(&self) -> Result<(), String> {
        for (id, device) in &self.duts {
            device.validate().map_err(|e| format!("dut {id}: {e}"))?;
        }
        for (name, forge) in &self.gitlab {
            forge.validate().map_err(|e| format!("gitlab {name}: {e}"))?;
        }
        for (name, pdu) in &self.pdus {
            if pdu.driver.trim().is_empty() {
                return Err(format!("pdu {name}: missing driver"));
            }
        }
        Ok(())
    }

    /// `{farm}-{base_name}-{idx}`, numbering devices sharing a base name by
    /// the order in which they were first seen
    #[must_use]
    pub fn full_name(&self, farm: &str, id: &str) -> Option<String> {
        let device = self.duts.get(id)?;
        let earlier = self
            .duts
            .iter()
            .filter(|(other_id, other)| {
                other.base_name == device.base_name
                    && (other.first_seen, other_id.as_str()) < (device.first_seen, id)
            })
            .count();
        Some(format!("{farm}-{}-{}", device.base_name, earlier + 1))
    }

    /// Find a device by id, or by its full name
    #[must_use]
    pub fn resolve_id(&self, farm: &str, id_or_name: &str) -> Option<String> {
        if self.duts.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.duts
            .keys()
            .find(|id| self.full_name(farm, id).as_deref() == Some(id_or_name))
            .cloned()
    }

    /// Device currently wired to `pdu`/`port_id`, if any
    #[must_use]
    pub fn device_on_port(&self, pdu: &str, port_id: &str) -> Option<(&String, &DeviceConfig)> {
        self.duts.iter().find(|(_, d)| {
            d.pdu.as_deref() == Some(pdu) && d.pdu_port_id.as_deref() == Some(port_id)
        })
    }
}

/// One power switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PduConfig {
    /// Driver key in the driver registry
    pub driver: String,
    /// Driver-specific settings
    #[serde(default)]
    pub config: serde_json::Value,
    /// Ports that must never be driven
    #[serde(default)]
    pub reserved_port_ids: BTreeSet<String>,
}

fn default_off_delay() -> f64 {
    30.0
}

/// One device under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub base_name: String,
    pub ip_address: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub manual_tags: Vec<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub local_tty_device: Option<String>,
    #[serde(default)]
    pub pdu: Option<String>,
    #[serde(default)]
    pub pdu_port_id: Option<String>,
    /// Minimum power-off time in seconds
    #[serde(default = "default_off_delay")]
    pub pdu_off_delay: f64,
    #[serde(default)]
    pub ready_for_service: bool,
    #[serde(default)]
    pub is_retired: bool,
    #[serde(default = "Utc::now")]
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Runner registration, keyed by forge name
    #[serde(default)]
    pub gitlab: BTreeMap<String, ForgeRunnerRecord>,
}

impl DeviceConfig {
    /// A freshly discovered device
    #[must_use]
    pub fn new(base_name: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            ip_address: ip_address.into(),
            tags: Vec::new(),
            manual_tags: Vec::new(),
            mac_address: None,
            local_tty_device: None,
            pdu: None,
            pdu_port_id: None,
            pdu_off_delay: default_off_delay(),
            ready_for_service: false,
            is_retired: false,
            first_seen: Utc::now(),
            comment: None,
            gitlab: BTreeMap::new(),
        }
    }

    /// # Errors
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_name.trim().is_empty() {
            return Err("base_name must not be empty".to_string());
        }
        if self.ip_address.parse::<Ipv4Addr>().is_err() {
            return Err(format!("'{}' is not an IPv4 address", self.ip_address));
        }
        if let Some(mac) = &self.mac_address
            && !looks_like_mac(mac)
        {
            return Err(format!("'{mac}' is not a MAC address"));
        }
        if !self.pdu_off_delay.is_finite() || self.pdu_off_delay < 0.0 {
            return Err(format!("invalid pdu_off_delay {}", self.pdu_off_delay));
        }
        Ok(())
    }

    /// Fit to receive jobs
    #[must_use]
    pub fn available(&self) -> bool {
        self.ready_for_service && !self.is_retired
    }

    /// Sorted union of the device tags, the manual tags and `farm:{farm}`
    #[must_use]
    pub fn all_tags(&self, farm: &str) -> Vec<String> {
        let mut tags: BTreeSet<String> = self
            .tags
            .iter()
            .chain(self.manual_tags.iter())
            .cloned()
            .collect();
        tags.insert(format!("farm:{farm}"));
        tags.into_iter().collect()
    }
}

/// Kind of runner the registration token creates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerType {
    #[default]
    InstanceType,
    GroupType,
    ProjectType,
}

fn default_true() -> bool {
    true
}

fn default_maximum_timeout() -> u64 {
    21600
}

/// A GitLab instance the fleet exposes runners on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeConfig {
    pub url: String,
    #[serde(default)]
    pub registration_token: String,
    #[serde(default)]
    pub runner_type: RunnerType,
    #[serde(default)]
    pub group_id: Option<u64>,
    #[serde(default)]
    pub project_id: Option<u64>,
    /// Personal access token used to read runner details
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_true")]
    pub expose_runners: bool,
    /// Seconds
    #[serde(default = "default_maximum_timeout")]
    pub maximum_timeout: u64,
    /// Runner of the farm gateway itself, for jobs that need no device
    #[serde(default)]
    pub gateway_runner: Option<ForgeRunnerRecord>,
}

impl ForgeConfig {
    /// # Errors
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !self.url.starts_with("https://") {
            return Err(format!("url '{}' must use https", self.url));
        }
        Ok(())
    }

    #[must_use]
    pub fn has_valid_registration_token(&self) -> bool {
        token_looks_valid(&self.registration_token)
    }

    #[must_use]
    pub fn has_valid_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(token_looks_valid)
    }

    #[must_use]
    pub fn should_expose_gateway_runner(&self) -> bool {
        self.expose_runners && self.gateway_runner.as_ref().is_some_and(|r| r.exposed)
    }
}

/// Runner registered for one device on one forge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeRunnerRecord {
    #[serde(default = "default_token")]
    pub token: String,
    /// Whether the runner should exist at all
    #[serde(default = "default_true")]
    pub exposed: bool,
    #[serde(default = "default_runner_id")]
    pub runner_id: i64,
}

fn default_token() -> String {
    INVALID_TOKEN.to_string()
}

fn default_runner_id() -> i64 {
    -1
}

impl Default for ForgeRunnerRecord {
    fn default() -> Self {
        Self {
            token: default_token(),
            exposed: true,
            runner_id: default_runner_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn device(base_name: &str, first_seen_secs: i64) -> DeviceConfig {
        let mut device = DeviceConfig::new(base_name, "10.0.0.2");
        device.first_seen = Utc.timestamp_opt(first_seen_secs, 0).unwrap();
        device
    }

    #[test]
    fn test_full_name_counts_earlier_devices_with_same_base() {
        let mut doc = FleetDocument::default();
        doc.duts.insert("c".to_string(), device("gfx9", 30));
        doc.duts.insert("a".to_string(), device("gfx9", 10));
        doc.duts.insert("b".to_string(), device("gfx10", 20));

        assert_eq!(doc.full_name("lab", "a").unwrap(), "lab-gfx9-1");
        assert_eq!(doc.full_name("lab", "c").unwrap(), "lab-gfx9-2");
        assert_eq!(doc.full_name("lab", "b").unwrap(), "lab-gfx10-1");
        assert_eq!(doc.full_name("lab", "zz"), None);

        assert_eq!(doc.resolve_id("lab", "lab-gfx9-2").as_deref(), Some("c"));
        assert_eq!(doc.resolve_id("lab", "b").as_deref(), Some("b"));
        assert_eq!(doc.resolve_id("lab", "lab-gfx9-3"), None);
    }

    #[test]
    fn test_all_tags_is_sorted_union_with_farm() {
        let mut dev = device("gfx9", 0);
        dev.tags = vec!["vram:8g".to_string(), "amdgpu".to_string()];
        dev.manual_tags = vec!["amdgpu".to_string(), "flaky".to_string()];

        assert_eq!(
            dev.all_tags("lab"),
            vec!["amdgpu", "farm:lab", "flaky", "vram:8g"]
        );
    }

    #[test]
    fn test_device_validation() {
        let mut dev = device("gfx9", 0);
        assert!(dev.validate().is_ok());

        dev.mac_address = Some("00:11:22:33:44:zz".to_string());
        assert!(dev.validate().is_err());
        dev.mac_address = Some("00:11:22:33:44:55".to_string());
        assert!(dev.validate().is_ok());

        dev.ip_address = "10.0.0.256".to_string();
        assert!(dev.validate().is_err());
    }

    #[test]
    fn test_forge_defaults_and_url_check() {
        let forge: ForgeConfig =
            serde_yaml::from_str("url: http://gitlab.example.com\n").unwrap();
        assert!(forge.expose_runners);
        assert_eq!(forge.maximum_timeout, 21600);
        assert_eq!(forge.runner_type, RunnerType::InstanceType);
        assert!(forge.validate().is_err());
        assert!(!forge.has_valid_registration_token());
        assert!(!forge.should_expose_gateway_runner());

        let forge: ForgeConfig = serde_yaml::from_str(
            "url: https://gitlab.example.com\ngateway_runner:\n  exposed: false\n",
        )
        .unwrap();
        assert!(!forge.should_expose_gateway_runner());
        let forge: ForgeConfig =
            serde_yaml::from_str("url: https://gitlab.example.com\ngateway_runner: {}\n").unwrap();
        assert!(forge.should_expose_gateway_runner());

        let record: ForgeRunnerRecord = serde_yaml::from_str("{}").unwrap();
        assert_eq!(record, ForgeRunnerRecord::default());
        assert!(!token_looks_valid(&record.token));
        assert!(token_looks_valid("glrt-12345678"));
    }

    #[test]
    fn test_mac_detection() {
        assert!(looks_like_mac("de:ad:be:ef:00:01"));
        assert!(!looks_like_mac("dead.beef.0001"));
        assert!(!looks_like_mac("de:ad:be:ef:00"));
    }
}
