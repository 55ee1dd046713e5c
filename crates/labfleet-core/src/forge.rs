//! Forge runner registration
//!
//! Every available device is exposed as one runner on every forge that asks
//! for it. Tokens are persisted per device and per forge, and re-created
//! whenever the forge forgot them or the runner description drifted.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{
    DeviceConfig, FleetDocument, ForgeConfig, ForgeRunnerRecord, INVALID_TOKEN, RunnerType,
    token_looks_valid,
};
use crate::error::CoreError;
use crate::store::{FleetStore, write_atomically};

const FORGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runner created by a registration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredRunner {
    pub id: i64,
    pub token: String,
}

/// What a forge knows about a runner
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunnerDetails {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tag_list: Vec<String>,
    #[serde(default)]
    pub maximum_timeout: Option<u64>,
}

/// Runner management API of a forge
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// Create a runner
    async fn register(
        &self,
        forge: &ForgeConfig,
        description: &str,
        tags: &[String],
    ) -> Result<RegisteredRunner, CoreError>;

    /// Whether the forge still accepts `token`
    async fn verify(&self, forge: &ForgeConfig, token: &str) -> Result<bool, CoreError>;

    /// Delete the runner owning `token`; returns whether it is gone
    async fn unregister(&self, forge: &ForgeConfig, token: &str) -> Result<bool, CoreError>;

    /// Runner settings, `None` when the runner does not exist
    async fn details(
        &self,
        forge: &ForgeConfig,
        runner_id: i64,
    ) -> Result<Option<RunnerDetails>, CoreError>;
}

/// GitLab runner REST API
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: reqwest::Client,
}

impl GitLabClient {
    /// # Errors
    /// Returns `CoreError::Forge` when the HTTP client cannot be built.
    pub fn new() -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(FORGE_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Forge(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(forge: &ForgeConfig, path: &str) -> String {
        format!("{}/api/v4{path}", forge.url.trim_end_matches('/'))
    }

    fn access_token(forge: &ForgeConfig) -> Result<&str, CoreError> {
        forge
            .access_token
            .as_deref()
            .filter(|t| token_looks_valid(t))
            .ok_or_else(|| CoreError::Forge(format!("{} has no usable access token", forge.url)))
    }
}

fn forge_error(e: &reqwest::Error) -> CoreError {
    CoreError::Forge(e.to_string())
}

#[async_trait]
impl ForgeClient for GitLabClient {
    async fn register(
        &self,
        forge: &ForgeConfig,
        description: &str,
        tags: &[String],
    ) -> Result<RegisteredRunner, CoreError> {
        let tag_list = tags.join(",");

        let request = if forge.has_valid_access_token() {
            let mut body = json!({
                "runner_type": forge.runner_type,
                "description": description,
                "tag_list": tag_list,
                "run_untagged": false,
                "maximum_timeout": forge.maximum_timeout,
            });
            match forge.runner_type {
                RunnerType::GroupType => body["group_id"] = json!(forge.group_id),
                RunnerType::ProjectType => body["project_id"] = json!(forge.project_id),
                RunnerType::InstanceType => {}
            }
            self.client
                .post(Self::url(forge, "/user/runners"))
                .header("PRIVATE-TOKEN", Self::access_token(forge)?)
                .json(&body)
        } else {
            self.client.post(Self::url(forge, "/runners")).json(&json!({
                "token": forge.registration_token,
                "description": description,
                "tag_list": tag_list,
                "run_untagged": false,
                "maximum_timeout": forge.maximum_timeout,
            }))
        };

        let response = request.send().await.map_err(|e| forge_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CoreError::Forge(format!(
                "runner registration failed with {status}: {message}"
            )));
        }
        response.json().await.map_err(|e| forge_error(&e))
    }

    async fn verify(&self, forge: &ForgeConfig, token: &str) -> Result<bool, CoreError> {
        if !token_looks_valid(token) {
            return Ok(false);
        }

        let response = self
            .client
            .post(Self::url(forge, "/runners/verify"))
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|e| forge_error(&e))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(false),
            status => Err(CoreError::Forge(format!("runner verification returned {status}"))),
        }
    }

    async fn unregister(&self, forge: &ForgeConfig, token: &str) -> Result<bool, CoreError> {
        let response = self
            .client
            .delete(Self::url(forge, "/runners"))
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|e| forge_error(&e))?;
        Ok(response.status() == StatusCode::NO_CONTENT)
    }

    async fn details(
        &self,
        forge: &ForgeConfig,
        runner_id: i64,
    ) -> Result<Option<RunnerDetails>, CoreError> {
        let response = self
            .client
            .get(Self::url(forge, &format!("/runners/{runner_id}")))
            .header("PRIVATE-TOKEN", Self::access_token(forge)?)
            .send()
            .await
            .map_err(|e| forge_error(&e))?;

        match response.status() {
            StatusCode::OK => response.json().await.map(Some).map_err(|e| forge_error(&e)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(CoreError::Forge(format!("runner lookup returned {status}"))),
        }
    }
}

/// Delete the runner behind `record`
///
/// Returns `false` when the forge still accepts the token afterwards.
pub async fn remove_runner(
    client: &dyn ForgeClient,
    forge: &ForgeConfig,
    record: &mut ForgeRunnerRecord,
) -> bool {
    if record.token == INVALID_TOKEN {
        return true;
    }

    let removed = client
        .unregister(forge, &record.token)
        .await
        .unwrap_or_else(|e| {
            warn!(forge = %forge.url, error = %e, "runner unregistration failed");
            false
        });
    if !removed && client.verify(forge, &record.token).await.unwrap_or(true) {
        return false;
    }

    record.token = INVALID_TOKEN.to_string();
    record.runner_id = -1;
    true
}

fn tag_set(tags: &[String]) -> BTreeSet<&str> {
    tags.iter().map(String::as_str).collect()
}

/// Make sure `record` holds a live runner matching `description` and `tags`
///
/// # Errors
/// Returns `CoreError::Forge` when the forge cannot be queried, or when the
/// runner cannot be replaced.
pub async fn verify_or_renew(
    client: &dyn ForgeClient,
    forge: &ForgeConfig,
    record: &mut ForgeRunnerRecord,
    description: &str,
    tags: &[String],
) -> Result<(), CoreError> {
    let valid = client.verify(forge, &record.token).await?;

    let needs_renewal = if !valid || record.runner_id < 0 {
        true
    } else if forge.has_valid_access_token() {
        match client.details(forge, record.runner_id).await? {
            Some(details) => {
                details.description != description
                    || tag_set(&details.tag_list) != tag_set(tags)
                    || details.maximum_timeout != Some(forge.maximum_timeout)
            }
            None => true,
        }
    } else {
        debug!(forge = %forge.url, runner = description, "no access token, skipping drift check");
        false
    };

    if !needs_renewal {
        return Ok(());
    }

    info!(forge = %forge.url, runner = description, "registering runner");
    if !remove_runner(client, forge, record).await {
        return Err(CoreError::Forge(format!(
            "could not remove the previous runner of {description}"
        )));
    }

    if !forge.has_valid_registration_token() && !forge.has_valid_access_token() {
        warn!(forge = %forge.url, runner = description, "no usable token to register a runner");
        return Ok(());
    }

    let runner = client.register(forge, description, tags).await?;
    info!(forge = %forge.url, runner = description, runner_id = runner.id, "runner registered");
    record.token = runner.token;
    record.runner_id = runner.id;
    Ok(())
}

/// Description of the farm's gateway runner
#[must_use]
pub fn gateway_runner_name(farm: &str) -> String {
    format!("{farm}-gateway")
}

/// Tags of the farm's gateway runner
#[must_use]
pub fn gateway_runner_tags(farm: &str) -> Vec<String> {
    vec![gateway_runner_name(farm), format!("farm:{farm}")]
}

/// A runner record refreshed against a forge, with the stored value it
/// started from
struct RecordUpdate {
    device: Option<String>,
    forge: String,
    before: Option<ForgeRunnerRecord>,
    after: ForgeRunnerRecord,
}

impl RecordUpdate {
    /// Store `after` unless the record changed since the snapshot
    fn apply(self, doc: &mut FleetDocument) {
        let current = match &self.device {
            Some(id) => doc.duts.get(id).map(|device| device.gitlab.get(&self.forge)),
            None => doc
                .gitlab
                .get(&self.forge)
                .map(|forge| forge.gateway_runner.as_ref()),
        };
        // Owner removed meanwhile
        let Some(current) = current else {
            return;
        };
        if current != self.before.as_ref() {
            warn!(
                device = self.device.as_deref().unwrap_or("gateway"),
                forge = %self.forge,
                "runner record changed during the forge refresh, keeping the newer one"
            );
            return;
        }

        match self.device {
            Some(id) => {
                if let Some(device) = doc.duts.get_mut(&id) {
                    device.gitlab.insert(self.forge, self.after);
                }
            }
            None => {
                if let Some(forge) = doc.gitlab.get_mut(&self.forge) {
                    forge.gateway_runner = Some(self.after);
                }
            }
        }
    }
}

/// Refresh the gateway runner of every forge, then give every device a
/// runner record per forge and refresh the runners of available devices
///
/// Failures are logged per runner and never stop the others. Only records
/// this pass changed are written back, and only when nobody changed them in
/// the meantime.
///
/// # Errors
/// Returns the store error when the records cannot be saved.
pub async fn expose_on_forges(
    client: &dyn ForgeClient,
    store: &FleetStore,
    farm: &str,
) -> Result<(), CoreError> {
    let doc = store.snapshot()?;
    let mut updates = Vec::new();

    let gateway_name = gateway_runner_name(farm);
    let gateway_tags = gateway_runner_tags(farm);
    for (forge_name, forge) in &doc.gitlab {
        if !forge.should_expose_gateway_runner() {
            continue;
        }
        let before = forge.gateway_runner.clone();
        let mut record = before.clone().unwrap_or_default();
        if let Err(e) = verify_or_renew(client, forge, &mut record, &gateway_name, &gateway_tags).await
        {
            warn!(forge = %forge_name, error = %e, "gateway runner refresh failed");
        }
        if before.as_ref() != Some(&record) {
            updates.push(RecordUpdate {
                device: None,
                forge: forge_name.clone(),
                before,
                after: record,
            });
        }
    }

    for (id, device) in &doc.duts {
        let full_name = doc.full_name(farm, id).unwrap_or_else(|| id.clone());
        let tags = device.all_tags(farm);

        for (forge_name, forge) in &doc.gitlab {
            let before = device.gitlab.get(forge_name).cloned();
            let mut record = before.clone().unwrap_or_default();

            if device.available() && forge.expose_runners && record.exposed {
                if let Err(e) =
                    verify_or_renew(client, forge, &mut record, &full_name, &tags).await
                {
                    warn!(device = %id, forge = %forge_name, error = %e, "runner refresh failed");
                }
            }
            if before.as_ref() != Some(&record) {
                updates.push(RecordUpdate {
                    device: Some(id.clone()),
                    forge: forge_name.clone(),
                    before,
                    after: record,
                });
            }
        }
    }

    if updates.is_empty() {
        return Ok(());
    }
    store.with_lock(|doc| -> Result<(), CoreError> {
        for update in updates {
            update.apply(doc);
        }
        Ok(())
    })
}

/// Remove the runners of a device that is leaving the fleet
pub async fn remove_device_runners(
    client: &dyn ForgeClient,
    doc: &FleetDocument,
    device_id: &str,
    device: &DeviceConfig,
) {
    for (forge_name, record) in &device.gitlab {
        let Some(forge) = doc.gitlab.get(forge_name) else {
            continue;
        };
        let mut record = record.clone();
        if !remove_runner(client, forge, &mut record).await {
            warn!(device = %device_id, forge = %forge_name, "runner could not be removed");
        }
    }
}

#[derive(Serialize)]
struct RunnerConfigFile {
    concurrent: usize,
    check_interval: u64,
    runners: Vec<RunnerEntry>,
}

#[derive(Serialize)]
struct RunnerEntry {
    name: String,
    url: String,
    token: String,
    executor: &'static str,
    limit: u32,
    environment: Vec<String>,
}

/// Runner daemon configuration for the gateway and every exposed device
///
/// # Errors
/// Returns `CoreError::Exec` when the configuration cannot be serialized.
pub fn render_runner_config(doc: &FleetDocument, farm: &str) -> Result<String, CoreError> {
    let mut runners = Vec::new();

    for forge in doc.gitlab.values() {
        let Some(record) = &forge.gateway_runner else {
            continue;
        };
        if !forge.should_expose_gateway_runner() || !token_looks_valid(&record.token) {
            continue;
        }
        runners.push(RunnerEntry {
            name: gateway_runner_name(farm),
            url: forge.url.clone(),
            token: record.token.clone(),
            executor: "shell",
            limit: 1,
            environment: Vec::new(),
        });
    }

    for (id, device) in &doc.duts {
        if !device.available() {
            continue;
        }
        let name = doc.full_name(farm, id).unwrap_or_else(|| id.clone());

        for (forge_name, forge) in &doc.gitlab {
            let Some(record) = device.gitlab.get(forge_name) else {
                continue;
            };
            if !forge.expose_runners || !record.exposed || !token_looks_valid(&record.token) {
                continue;
            }
            runners.push(RunnerEntry {
                name: name.clone(),
                url: forge.url.clone(),
                token: record.token.clone(),
                executor: "custom",
                limit: 1,
                environment: vec![format!("LABFLEET_DEVICE_ID={id}")],
            });
        }
    }

    let file = RunnerConfigFile {
        concurrent: runners.len().max(1),
        check_interval: 3,
        runners,
    };
    toml::to_string(&file).map_err(|e| CoreError::Exec(format!("runner config: {e}")))
}

/// Write the runner configuration to `path`
///
/// # Errors
/// Returns the rendering or store I/O error.
pub fn write_runner_config(path: &Path, doc: &FleetDocument, farm: &str) -> Result<(), CoreError> {
    let rendered = render_runner_config(doc, farm)?;
    if std::fs::read_to_string(path).is_ok_and(|current| current == rendered) {
        return Ok(());
    }
    write_atomically(path, rendered.as_bytes())?;
    info!(path = %path.display(), "runner configuration written");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::FakeForge;
    use super::*;

    fn forge() -> ForgeConfig {
        ForgeConfig {
            url: "https://gitlab.example.com".to_string(),
            registration_token: "glrt-registration".to_string(),
            runner_type: RunnerType::InstanceType,
            group_id: None,
            project_id: None,
            access_token: Some("glpat-access-token".to_string()),
            expose_runners: true,
            maximum_timeout: 3600,
            gateway_runner: None,
        }
    }

    fn store_with(doc: FleetDocument) -> (tempfile::TempDir, FleetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FleetStore::open_with_lock_retry(
            dir.path().join("fleet.yml"),
            2,
            Duration::from_millis(5),
        )
        .unwrap();
        store
            .with_lock(|current| -> Result<(), CoreError> {
                *current = doc;
                Ok(())
            })
            .unwrap();
        (dir, store)
    }

    fn ready_device() -> DeviceConfig {
        let mut device = DeviceConfig::new("gfx9", "10.0.0.2");
        device.ready_for_service = true;
        device
    }

    /// Flips the device's runner record off while a registration is running
    struct EditingForge<'a> {
        inner: FakeForge,
        store: &'a FleetStore,
    }

    #[async_trait]
    impl<'a> ForgeClient for EditingForge<'a> {
        async fn register(
            &self,
            forge: &ForgeConfig,
            description: &str,
            tags: &[String],
        ) -> Result<RegisteredRunner, CoreError> {
            self.store.with_lock(|doc| -> Result<(), CoreError> {
                let disabled = ForgeRunnerRecord {
                    exposed: false,
                    ..ForgeRunnerRecord::default()
                };
                doc.duts
                    .get_mut("dev")
                    .unwrap()
                    .gitlab
                    .insert("main".to_string(), disabled);
                Ok(())
            })?;
            self.inner.register(forge, description, tags).await
        }

        async fn verify(&self, forge: &ForgeConfig, token: &str) -> Result<bool, CoreError> {
            self.inner.verify(forge, token).await
        }

        async fn unregister(&self, forge: &ForgeConfig, token: &str) -> Result<bool, CoreError> {
            self.inner.unregister(forge, token).await
        }

        async fn details(
            &self,
            forge: &ForgeConfig,
            runner_id: i64,
        ) -> Result<Option<RunnerDetails>, CoreError> {
            self.inner.details(forge, runner_id).await
        }
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_fresh_record_gets_registered() {
        let client = FakeForge::default();
        let mut record = ForgeRunnerRecord::default();

        verify_or_renew(&client, &forge(), &mut record, "lab-gfx9-1", &tags(&["a"]))
            .await
            .unwrap();

        assert_eq!(record.runner_id, 1);
        assert!(token_looks_valid(&record.token));
        assert_eq!(client.calls(), vec!["register lab-gfx9-1"]);
    }

    #[tokio::test]
    async fn test_matching_runner_is_left_alone() {
        let client = FakeForge::default();
        let mut record = ForgeRunnerRecord::default();
        verify_or_renew(&client, &forge(), &mut record, "lab-gfx9-1", &tags(&["a", "b"]))
            .await
            .unwrap();

        verify_or_renew(&client, &forge(), &mut record, "lab-gfx9-1", &tags(&["b", "a"]))
            .await
            .unwrap();
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_drifted_tags_reregister() {
        let client = FakeForge::default();
        let mut record = ForgeRunnerRecord::default();
        verify_or_renew(&client, &forge(), &mut record, "lab-gfx9-1", &tags(&["a"]))
            .await
            .unwrap();
        let old_token = record.token.clone();

        verify_or_renew(&client, &forge(), &mut record, "lab-gfx9-1", &tags(&["a", "new"]))
            .await
            .unwrap();

        assert_eq!(
            client.calls(),
            vec![
                "register lab-gfx9-1".to_string(),
                format!("unregister {old_token}"),
                "register lab-gfx9-1".to_string(),
            ]
        );
        assert_eq!(record.runner_id, 2);
    }

    #[tokio::test]
    async fn test_forgotten_token_reregisters() {
        let client = FakeForge::default();
        let mut record = ForgeRunnerRecord {
            token: "glrt-forgotten".to_string(),
            exposed: true,
            runner_id: 12,
        };

        verify_or_renew(&client, &forge(), &mut record, "lab-gfx9-1", &tags(&["a"]))
            .await
            .unwrap();
        assert_ne!(record.token, "glrt-forgotten");
        assert_eq!(record.runner_id, 1);
    }

    #[tokio::test]
    async fn test_remove_sentinel_is_noop() {
        let client = FakeForge::default();
        let mut record = ForgeRunnerRecord::default();
        assert!(remove_runner(&client, &forge(), &mut record).await);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_runner_is_registered_and_rendered() {
        let mut doc = FleetDocument::default();
        let mut main = forge();
        main.gateway_runner = Some(ForgeRunnerRecord::default());
        doc.gitlab.insert("main".to_string(), main);
        let (_dir, store) = store_with(doc);
        let client = FakeForge::default();

        expose_on_forges(&client, &store, "lab").await.unwrap();
        assert_eq!(client.calls(), vec!["register lab-gateway"]);

        let doc = store.snapshot().unwrap();
        let record = doc.gitlab["main"].gateway_runner.clone().unwrap();
        assert_eq!(record.runner_id, 1);
        let (_, _, tags) = client.runners.lock().unwrap()[&record.token].clone();
        assert_eq!(tags, gateway_runner_tags("lab"));

        let rendered = render_runner_config(&doc, "lab").unwrap();
        let parsed: toml::Value = toml::from_str(&rendered).unwrap();
        let runners = parsed["runners"].as_array().unwrap();
        assert_eq!(runners.len(), 1);
        assert_eq!(runners[0]["name"].as_str(), Some("lab-gateway"));
        assert_eq!(runners[0]["token"].as_str(), Some(record.token.as_str()));

        // A healthy gateway runner is left alone
        expose_on_forges(&client, &store, "lab").await.unwrap();
        assert_eq!(client.calls().len(), 1);
        assert!(store.diff().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_runner_needs_a_record_and_exposure() {
        let mut doc = FleetDocument::default();
        let mut hidden = forge();
        hidden.gateway_runner = Some(ForgeRunnerRecord {
            exposed: false,
            ..ForgeRunnerRecord::default()
        });
        doc.gitlab.insert("hidden".to_string(), hidden);
        doc.gitlab.insert("plain".to_string(), forge());
        let (_dir, store) = store_with(doc);
        let client = FakeForge::default();

        expose_on_forges(&client, &store, "lab").await.unwrap();
        assert!(client.calls().is_empty());
        assert!(store.snapshot().unwrap().gitlab["plain"].gateway_runner.is_none());
    }

    #[tokio::test]
    async fn test_device_runner_records_are_created_and_refreshed() {
        let mut doc = FleetDocument::default();
        doc.gitlab.insert("main".to_string(), forge());
        doc.duts.insert("dev".to_string(), ready_device());
        let mut idle = DeviceConfig::new("gfx10", "10.0.0.3");
        idle.ready_for_service = false;
        doc.duts.insert("idle".to_string(), idle);
        let (_dir, store) = store_with(doc);
        let client = FakeForge::default();

        expose_on_forges(&client, &store, "lab").await.unwrap();

        let doc = store.snapshot().unwrap();
        assert!(token_looks_valid(&doc.duts["dev"].gitlab["main"].token));
        assert_eq!(doc.duts["idle"].gitlab["main"], ForgeRunnerRecord::default());
        assert_eq!(client.calls(), vec!["register lab-gfx9-1"]);
    }

    #[tokio::test]
    async fn test_records_changed_during_refresh_are_kept() {
        let mut doc = FleetDocument::default();
        doc.gitlab.insert("main".to_string(), forge());
        doc.duts.insert("dev".to_string(), ready_device());
        let (_dir, store) = store_with(doc);
        let client = EditingForge {
            inner: FakeForge::default(),
            store: &store,
        };

        expose_on_forges(&client, &store, "lab").await.unwrap();

        let record = store.read(|doc| doc.duts["dev"].gitlab["main"].clone()).unwrap();
        assert!(!record.exposed);
        assert_eq!(record.token, INVALID_TOKEN);
    }

    #[test]
    fn test_runner_config_lists_exposed_devices_only() {
        let mut doc = FleetDocument::default();
        doc.gitlab.insert("main".to_string(), forge());

        let mut ready = DeviceConfig::new("gfx9", "10.0.0.2");
        ready.ready_for_service = true;
        ready.gitlab.insert(
            "main".to_string(),
            ForgeRunnerRecord {
                token: "glrt-ready-token".to_string(),
                exposed: true,
                runner_id: 3,
            },
        );
        let mut retired = ready.clone();
        retired.is_retired = true;
        doc.duts.insert("ready".to_string(), ready);
        doc.duts.insert("retired".to_string(), retired);

        let rendered = render_runner_config(&doc, "lab").unwrap();
        let parsed: toml::Value = toml::from_str(&rendered).unwrap();
        let runners = parsed["runners"].as_array().unwrap();
        assert_eq!(runners.len(), 1);
        assert_eq!(runners[0]["token"].as_str(), Some("glrt-ready-token"));
        assert_eq!(runners[0]["executor"].as_str(), Some("custom"));
    }
}
