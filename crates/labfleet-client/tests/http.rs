//! Client against a stub daemon bound to a local port

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    routing::{get, post},
};
use labfleet_client::{ClientError, HttpClient};
use serde_json::{Value, json};

async fn device(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    if id == "lab-rpi4-1" {
        return (
            StatusCode::OK,
            Json(json!({
                "id": "aa:bb:cc:dd:ee:01",
                "base_name": "rpi4",
                "full_name": "lab-rpi4-1",
                "state": "IDLE",
                "ready_for_service": true,
                "is_retired": false,
                "has_pdu_assigned": true,
                "quick_check_queued": false,
                "local_tty_device": null,
                "tags": ["board:rpi4"],
                "manual_tags": [],
                "mac_address": "aa:bb:cc:dd:ee:01",
                "ip_address": "10.0.0.11",
                "training": {
                    "state": "IDLE",
                    "is_active": false,
                    "is_registered": true,
                    "boot_loop_counts": 100,
                    "qualifying_rate": 100,
                    "current_loop_count": 0,
                    "statuses": {}
                },
                "pdu": {"name": "bench", "port_id": "1"},
                "pdu_off_delay": 30.0,
                "comment": null
            })),
        );
    }
    (
        StatusCode::NOT_FOUND,
        Json(json!({"code": "NOT_FOUND", "message": format!("device {id} not found")})),
    )
}

async fn jobs(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let tags = body["target"]["tags"].as_array().cloned().unwrap_or_default();
    if tags.iter().any(|t| t == "board:rpi4") {
        (StatusCode::OK, Json(json!({"version": 1, "device": "lab-rpi4-1"})))
    } else {
        (
            StatusCode::NOT_ACCEPTABLE,
            Json(json!({"version": 1, "error_msg": "no active device found matching the tags"})),
        )
    }
}

async fn stub_daemon() -> HttpClient {
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/api/v1/dut/{id}", get(device))
        .route("/api/v1/jobs", post(jobs));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    HttpClient::new(format!("http://{addr}")).unwrap()
}

#[tokio::test]
async fn test_health() {
    let client = stub_daemon().await;
    assert_eq!(client.health().await.unwrap().status, "ok");
}

#[tokio::test]
async fn test_get_device() {
    let client = stub_daemon().await;

    let device = client.get_device("lab-rpi4-1").await.unwrap();
    assert_eq!(device.id, "aa:bb:cc:dd:ee:01");
    assert_eq!(device.pdu.port_id.as_deref(), Some("1"));

    let err = client.get_device("lab-rpi4-9").await.unwrap_err();
    assert!(err.is_not_found());
    match err {
        ClientError::Api { code, message, .. } => {
            assert_eq!(code.as_deref(), Some("NOT_FOUND"));
            assert!(message.contains("lab-rpi4-9"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_submit_job() {
    let client = stub_daemon().await;

    let device = client
        .submit_job("version: 1", 4242)
        .tag("board:rpi4")
        .send()
        .await
        .unwrap();
    assert_eq!(device, "lab-rpi4-1");

    let err = client
        .submit_job("version: 1", 4242)
        .tag("board:odroid")
        .send()
        .await
        .unwrap_err();
    match err {
        ClientError::JobRefused { status, message } => {
            assert_eq!(status, 406);
            assert!(message.contains("matching the tags"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
