//! HTTP router configuration

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::{ApiDoc, devices, discovery, jobs, pdus, system};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // System endpoints
        .route("/health", get(system::health))
        .route("/api/v1/full-state", get(system::full_state))
        // Devices
        .route("/api/v1/duts", get(devices::list_devices))
        .route("/api/v1/dut", post(devices::register_device))
        .route("/api/v1/dut/", post(devices::register_device))
        .route(
            "/api/v1/dut/discover",
            get(discovery::get_discovery)
                .post(discovery::arm_discovery)
                .delete(discovery::cancel_discovery),
        )
        .route(
            "/api/v1/dut/{id}",
            get(devices::get_device)
                .patch(devices::patch_device)
                .delete(devices::delete_device),
        )
        .route(
            "/api/v1/dut/{id}/quick_check",
            get(devices::get_quick_check).post(devices::queue_quick_check),
        )
        .route("/api/v1/dut/{id}/cancel_job", post(devices::cancel_job))
        .route("/api/v1/dut/{id}/boot_config", get(devices::boot_config))
        // Power switches
        .route("/api/v1/pdus", get(pdus::list_pdus))
        .route("/api/v1/pdu/{name}", get(pdus::get_pdu))
        .route(
            "/api/v1/pdu/{name}/port/{port_id}",
            get(pdus::get_port).patch(pdus::patch_port),
        )
        // Jobs
        .route("/api/v1/jobs", post(jobs::submit_job))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use kameo::prelude::*;
    use labfleet_core::{
        FleetContext, FleetOrchestrator, FleetOrchestratorArgs, FleetSettings, FleetStore,
        GitLabClient, PduRegistry, UnixSocketConnector,
    };
    use labfleet_exec::CommandLauncher;
    use labfleet_power::DriverRegistry;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    const FLEET: &str = r"
pdus:
  bench:
    driver: dummy
    config:
      ports: 2
    reserved_port_ids: ['2']
duts:
  'aa:bb:cc:dd:ee:01':
    base_name: rpi
    ip_address: 10.0.0.11
    first_seen: 2024-01-01T00:00:00Z
    tags: ['board:rpi4']
";

    async fn app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("fleet.yml");
        std::fs::write(&store_path, FLEET).unwrap();

        let mut settings = FleetSettings::new("lab", dir.path().join("run"));
        settings.training.boot_loop_count = -1;
        let ctx = Arc::new(FleetContext {
            settings,
            store: Arc::new(FleetStore::open(&store_path).unwrap()),
            pdus: PduRegistry::new(DriverRegistry::with_builtin()),
            launcher: Arc::new(CommandLauncher::new("false")),
            connector: Arc::new(UnixSocketConnector),
            forge: Arc::new(GitLabClient::new().unwrap()),
        });
        let orchestrator = FleetOrchestrator::spawn(FleetOrchestratorArgs { ctx });
        let router = create_router(Arc::new(AppState::new(orchestrator)))
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))));
        (dir, router)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, router) = app().await;
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_devices_by_id_and_full_name() {
        let (_dir, router) = app().await;

        let (status, body) = call(&router, "GET", "/api/v1/duts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["duts"]["aa:bb:cc:dd:ee:01"].is_object());

        let (status, body) = call(&router, "GET", "/api/v1/dut/lab-rpi-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "aa:bb:cc:dd:ee:01");
        assert_eq!(body["state"], "WAIT_FOR_CONFIG");

        let (status, body) = call(&router, "GET", "/api/v1/dut/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_register_then_patch() {
        let (_dir, router) = app().await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/v1/dut/",
            Some(r#"{"mac_address": "aa:bb:cc:dd:ee:02", "base_name": "odroid", "ip_address": "10.0.0.12"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["full_name"], "lab-odroid-1");

        let (status, body) = call(
            &router,
            "PATCH",
            "/api/v1/dut/aa:bb:cc:dd:ee:02",
            Some(r#"{"comment": "flaky usb"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["comment"], "flaky usb");

        let (status, _) = call(
            &router,
            "PATCH",
            "/api/v1/dut/aa:bb:cc:dd:ee:02",
            Some(r#"{"pdu_off_delay": -3.0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_port_and_discovery_errors() {
        let (_dir, router) = app().await;

        let (status, body) = call(
            &router,
            "PATCH",
            "/api/v1/pdu/bench/port/2",
            Some(r#"{"state": "on"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");

        let (status, _) = call(&router, "GET", "/api/v1/pdu/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, "GET", "/api/v1/dut/discover", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());

        let (status, _) = call(&router, "DELETE", "/api/v1/dut/discover", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_job_for_unknown_device() {
        let (_dir, router) = app().await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/v1/jobs",
            Some(r#"{"job": "version: 1", "target": {"id": "nope"}, "callback": {"port": 4242}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error_msg"].as_str().unwrap().contains("nope"));
        assert!(body.get("device").is_none());
    }
}
