//! HTTP client for the labfleet daemon

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use labfleet_api::{
    requests::{
        CallbackRequest, DevicePatchRequest, DeviceRegistrationRequest, DiscoveryRequest,
        JobSubmitRequest, JobTarget, PortPatchRequest,
    },
    responses::{
        DeviceListResponse, DeviceStatus, DiscoveryStatus, FullStateResponse, HealthResponse,
        JobSubmitResponse, MessageResponse, PduListResponse, PduSnapshot, PortSnapshot,
    },
};

use crate::error::{ClientError, Result};

#[derive(Deserialize)]
struct QuickCheck {
    quick_check_queued: bool,
}

/// HTTP client for communicating with the labfleet daemon
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    ///
    /// # Example
    /// ```no_run
    /// use labfleet_client::HttpClient;
    ///
    /// let client = HttpClient::new("http://localhost:8000")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new HTTP client with a custom `reqwest::Client`
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn with_client(base_url: impl AsRef<str>, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(ClientError::Url)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.request(method, self.url(path)?))
    }

    /// Send a request, turning any non-2xx answer into `ClientError::Api`
    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_body(status, &body));
        }

        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Self::send(self.request(Method::GET, path)?).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        Self::send(self.request(Method::POST, path)?.json(body)).await
    }

    async fn patch<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        Self::send(self.request(Method::PATCH, path)?.json(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Self::send(self.request(Method::DELETE, path)?).await
    }

    // System endpoints

    /// Get daemon health status
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/health").await
    }

    /// Every PDU, every device and the discovery window at once
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn full_state(&self) -> Result<FullStateResponse> {
        self.get("/api/v1/full-state").await
    }

    // Device endpoints

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn list_devices(&self) -> Result<DeviceListResponse> {
        self.get("/api/v1/duts").await
    }

    /// Get a device by id or full name
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    ///
    /// # Example
    /// ```no_run
    /// # use labfleet_client::HttpClient;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = HttpClient::new("http://localhost:8000")?;
    /// let device = client.get_device("lab-rpi4-1").await?;
    /// println!("{} is {}", device.full_name, device.state);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_device(&self, id: &str) -> Result<DeviceStatus> {
        self.get(&format!("/api/v1/dut/{id}")).await
    }

    /// Register a device, or update it when it is already known
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn register_device(&self, request: &DeviceRegistrationRequest) -> Result<DeviceStatus> {
        self.post("/api/v1/dut/", request).await
    }

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn patch_device(&self, id: &str, patch: &DevicePatchRequest) -> Result<DeviceStatus> {
        self.patch(&format!("/api/v1/dut/{id}"), patch).await
    }

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn delete_device(&self, id: &str) -> Result<MessageResponse> {
        self.delete(&format!("/api/v1/dut/{id}")).await
    }

    /// Whether a quick check is queued for the device
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn quick_check_queued(&self, id: &str) -> Result<bool> {
        let reply: QuickCheck = self.get(&format!("/api/v1/dut/{id}/quick_check")).await?;
        Ok(reply.quick_check_queued)
    }

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn queue_quick_check(&self, id: &str) -> Result<bool> {
        let reply: QuickCheck = self
            .post(&format!("/api/v1/dut/{id}/quick_check"), &serde_json::json!({}))
            .await?;
        Ok(reply.quick_check_queued)
    }

    /// Cancel the job running on a device
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn cancel_job(&self, id: &str) -> Result<MessageResponse> {
        self.post(&format!("/api/v1/dut/{id}/cancel_job"), &serde_json::json!({}))
            .await
    }

    /// Boot configuration the daemon would serve the device
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn boot_config(&self, id: &str) -> Result<Value> {
        self.get(&format!("/api/v1/dut/{id}/boot_config")).await
    }

    // Discovery

    /// Current discovery window, if one is armed
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn discovery(&self) -> Result<Option<DiscoveryStatus>> {
        self.get("/api/v1/dut/discover").await
    }

    /// Power on a port and wait for the device behind it to register
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn arm_discovery(&self, request: &DiscoveryRequest) -> Result<DiscoveryStatus> {
        self.post("/api/v1/dut/discover", request).await
    }

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn cancel_discovery(&self) -> Result<MessageResponse> {
        self.delete("/api/v1/dut/discover").await
    }

    // Power switches

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn list_pdus(&self) -> Result<PduListResponse> {
        self.get("/api/v1/pdus").await
    }

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn get_pdu(&self, name: &str) -> Result<PduSnapshot> {
        self.get(&format!("/api/v1/pdu/{name}")).await
    }

    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn get_port(&self, pdu: &str, port_id: &str) -> Result<PortSnapshot> {
        self.get(&format!("/api/v1/pdu/{pdu}/port/{port_id}")).await
    }

    /// Switch a port or change its reservation
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn patch_port(
        &self,
        pdu: &str,
        port_id: &str,
        patch: &PortPatchRequest,
    ) -> Result<PortSnapshot> {
        self.patch(&format!("/api/v1/pdu/{pdu}/port/{port_id}"), patch)
            .await
    }

    // Jobs

    /// Start building a job submission
    ///
    /// # Example
    /// ```no_run
    /// # use labfleet_client::HttpClient;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = HttpClient::new("http://localhost:8000")?;
    /// let device = client
    ///     .submit_job("version: 1\n", 4242)
    ///     .tag("board:rpi4")
    ///     .send()
    ///     .await?;
    /// println!("running on {device}");
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn submit_job(&self, job: impl Into<String>, callback_port: u16) -> SubmitJobBuilder {
        SubmitJobBuilder::new(self.clone(), job.into(), callback_port)
    }
}

/// Builder for a job submission
#[derive(Debug, Clone)]
pub struct SubmitJobBuilder {
    client: HttpClient,
    request: JobSubmitRequest,
}

impl SubmitJobBuilder {
    fn new(client: HttpClient, job: String, callback_port: u16) -> Self {
        Self {
            client,
            request: JobSubmitRequest {
                version: 1,
                job_id: None,
                job,
                target: JobTarget::default(),
                callback: CallbackRequest {
                    host: None,
                    port: callback_port,
                },
            },
        }
    }

    /// Run on this device only
    #[must_use]
    pub fn device(mut self, id: impl Into<String>) -> Self {
        self.request.target.id = Some(id.into());
        self
    }

    /// Require a tag on the device (repeatable for AND logic)
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.request.target.tags.push(tag.into());
        self
    }

    /// Host the runner should call back, instead of our own address
    #[must_use]
    pub fn callback_host(mut self, host: impl Into<String>) -> Self {
        self.request.callback.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn job_id(mut self, job_id: impl Into<String>) -> Self {
        self.request.job_id = Some(job_id.into());
        self
    }

    /// The request that `send` would post
    #[must_use]
    pub fn request(&self) -> &JobSubmitRequest {
        &self.request
    }

    /// Submit the job and return the device it was dispatched to
    ///
    /// # Errors
    /// Returns `ClientError::JobRefused` when the daemon could not place the
    /// job, or an error if the request fails.
    pub async fn send(self) -> Result<String> {
        let response = self
            .client
            .request(Method::POST, "/api/v1/jobs")?
            .json(&self.request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        match serde_json::from_str::<JobSubmitResponse>(&body) {
            Ok(JobSubmitResponse {
                device: Some(device),
                ..
            }) if (200..300).contains(&status) => Ok(device),
            Ok(reply) => Err(ClientError::JobRefused {
                status,
                message: reply
                    .error_msg
                    .unwrap_or_else(|| "no device was selected".to_string()),
            }),
            Err(_) => Err(ClientError::from_body(status, &body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url() {
        assert!(HttpClient::new("not a url").is_err());
    }

    #[test]
    fn test_url_building() {
        let client = HttpClient::new("http://localhost:8000").unwrap();
        let url = client.url("/api/v1/dut/lab-rpi4-1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/dut/lab-rpi4-1");
    }

    #[test]
    fn test_submit_job_builder() {
        let client = HttpClient::new("http://localhost:8000").unwrap();
        let builder = client
            .submit_job("version: 1", 4242)
            .tag("board:rpi4")
            .tag("usb:2")
            .callback_host("10.0.0.5")
            .job_id("build-17");

        let request = builder.request();
        assert_eq!(request.target.tags, vec!["board:rpi4", "usb:2"]);
        assert_eq!(request.target.id, None);
        assert_eq!(request.callback.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(request.callback.port, 4242);
        assert_eq!(request.job_id.as_deref(), Some("build-17"));
    }
}
