//! Request types for the API

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Accept port identifiers written either as strings or as bare integers
fn port_id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPortId {
        Text(String),
        Number(i64),
    }

    Ok(match RawPortId::deserialize(deserializer)? {
        RawPortId::Text(s) => s,
        RawPortId::Number(n) => n.to_string(),
    })
}

/// Register a new device or update an existing one
///
/// Sent by the self-registration job running on the device, or by an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DeviceRegistrationRequest {
    /// Stable identity, defaults to `mac_address` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_tty_device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_for_service: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_retired: Option<bool>,
}

/// Operator-editable device fields
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DevicePatchRequest {
    /// Minimum power-off time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdu_off_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_for_service: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_retired: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_tags: Option<Vec<String>>,
}

/// Change the state or the reservation of a power port
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PortPatchRequest {
    /// `ON` or `OFF`, case-insensitive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved: Option<bool>,
}

/// Arm a discovery window on a power port
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryRequest {
    pub pdu: String,
    #[serde(deserialize_with = "port_id_from_any")]
    pub port_id: String,
    /// Seconds before the window closes on its own (default 150)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Where a job should run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobTarget {
    /// Specific device id or full name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tags the device must carry
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Client endpoint the job runner connects back to
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackRequest {
    /// Defaults to the submitting peer's address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub port: u16,
}

/// Submit a job to the fleet
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobSubmitRequest {
    #[serde(default = "default_job_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Raw job description, forwarded verbatim to the job runner
    pub job: String,
    #[serde(default)]
    pub target: JobTarget,
    pub callback: CallbackRequest,
}

fn default_job_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_request_accepts_numeric_port() {
        let req: DiscoveryRequest =
            serde_json::from_str(r#"{"pdu": "pdu-1", "port_id": 4}"#).unwrap();
        assert_eq!(req.port_id, "4");
        assert_eq!(req.timeout, None);
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let res: Result<DevicePatchRequest, _> =
            serde_json::from_str(r#"{"base_name": "nope"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_job_request_defaults() {
        let req: JobSubmitRequest =
            serde_json::from_str(r#"{"job": "version: 1", "callback": {"port": 4242}}"#).unwrap();
        assert_eq!(req.version, 1);
        assert!(req.target.tags.is_empty());
        assert!(req.callback.host.is_none());
    }
}
