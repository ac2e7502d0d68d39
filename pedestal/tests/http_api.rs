mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{udp_config, wait_for, MockFirmware};
use icd::{Axis, StatusRegister};
use pedestal::{api, Pedestal};
use pedestal_types::{ErrorLogEntry, Page, PopupDelta, PopupSnapshot, StatusBarSummary, UdpHealth};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(3);

struct TestServer {
    base: String,
    client: reqwest::Client,
    pedestal: Arc<Pedestal>,
    firmware: MockFirmware,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let firmware = MockFirmware::start().await;
        let pedestal = Pedestal::udp(udp_config(firmware.addr)).unwrap();
        pedestal.start();
        assert!(wait_for(TIMEOUT, || pedestal.link().health().healthy).await);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(api::serve(pedestal.clone(), listener, shutdown.clone()));

        Self {
            base,
            client: reqwest::Client::new(),
            pedestal,
            firmware,
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    async fn fault(&self, register: StatusRegister, bit: u8, on: bool) {
        self.firmware
            .sim
            .lock()
            .unwrap()
            .inject_fault(register, bit, on);
    }

    async fn wait_for_log_len(&self, len: usize) -> bool {
        wait_for(TIMEOUT, || self.pedestal.error_log().len() >= len).await
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.pedestal.shutdown().await;
        self.firmware.stop().await;
    }
}

#[tokio::test]
async fn test_health_and_status_endpoints() {
    let server = TestServer::start().await;

    let health: UdpHealth = server.get("/api/udp/health").await.json().await.unwrap();
    assert!(health.running);
    assert!(health.healthy);

    let resp = server.get("/api/status").await;
    assert_eq!(resp.status(), 200);
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["status"]["mainBoardStatusBits"], "00000000");
    assert!(status["status"]["elevationAngle"].is_number());
    assert!(status["control"]["positionOffsets"].is_object());

    let resp = server.get("/api/firmware").await;
    assert_eq!(resp.status(), 404);

    let resp = server.get("/metrics").await;
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("pedestal_udp_status_frames_total"));

    server.stop().await;
}

#[tokio::test]
async fn test_firmware_info_command() {
    let server = TestServer::start().await;

    let resp = server.post("/api/commands/firmware-info", json!({})).await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["command"], "FirmwareInfoRequest");

    assert!(wait_for(TIMEOUT, || server.pedestal.firmware().latest().is_some()).await);
    let info: Value = server.get("/api/firmware").await.json().await.unwrap();
    assert_eq!(info["main"]["major"], 2);

    server.stop().await;
}

#[tokio::test]
async fn test_command_validation() {
    let server = TestServer::start().await;

    let resp = server.post("/api/commands/emergency/X", json!({})).await;
    assert_eq!(resp.status(), 400);

    let resp = server.post("/api/commands/stop", json!({ "axes": [] })).await;
    assert_eq!(resp.status(), 400);

    let resp = server
        .post("/api/commands/stop", json!({ "axes": ["azimuth", "train"] }))
        .await;
    assert_eq!(resp.status(), 202);

    let resp = server
        .post(
            "/api/commands/manual",
            json!({ "axes": ["train"], "train": { "angle": 3.0, "speed": 30.0 } }),
        )
        .await;
    assert_eq!(resp.status(), 202);
    assert!(
        wait_for(TIMEOUT, || {
            (server.firmware.sim.lock().unwrap().angle(Axis::Train) - 3.0).abs() < 1e-3
        })
        .await
    );
    assert_eq!(server.pedestal.control().commanded_angle(Axis::Train), Some(3.0));

    let resp = server
        .post("/api/commands/offset/time", json!({ "offsetMs": 250.0 }))
        .await;
    assert_eq!(resp.status(), 202);
    assert_eq!(server.pedestal.control().time_offset_ms(), 250.0);

    server.stop().await;
}

#[tokio::test]
async fn test_emergency_reaches_error_log_endpoints() {
    let server = TestServer::start().await;

    let resp = server.post("/api/commands/emergency/E", json!({})).await;
    assert_eq!(resp.status(), 202);
    assert!(server.wait_for_log_len(1).await);

    let active: Vec<ErrorLogEntry> = server
        .get("/api/error-log/active")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].error_key, "EMERGENCY_STOP");

    let bar: StatusBarSummary = server
        .get("/api/error-log/status-bar")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(bar.critical_count, 1);

    let page: Page<ErrorLogEntry> = server
        .get("/api/error-log/search?severity=CRITICAL&size=5")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page.total_elements, 1);
    assert_eq!(page.size, 5);

    let page: Page<ErrorLogEntry> = server
        .get("/api/error-log/search?category=FEED")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page.total_elements, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_popup_delta_lifecycle() {
    let server = TestServer::start().await;

    let resp = server.get("/api/error-log/popup/console/delta").await;
    assert_eq!(resp.status(), 404);

    let snapshot: PopupSnapshot = server
        .post("/api/error-log/popup/console", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert!(snapshot.entries.is_empty());

    server.fault(StatusRegister::TrainBoardStatus, 2, true).await;
    assert!(server.wait_for_log_len(1).await);

    let delta: PopupDelta = server
        .get("/api/error-log/popup/console/delta")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(delta.entries.len(), 1);
    assert_eq!(delta.entries[0].error_key, "CW_HARD_LIMIT");

    let delta: PopupDelta = server
        .get("/api/error-log/popup/console/delta")
        .await
        .json()
        .await
        .unwrap();
    assert!(delta.entries.is_empty());

    let resp = server
        .client
        .delete(server.url("/api/error-log/popup/console"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = server.get("/api/error-log/popup/console/delta").await;
    assert_eq!(resp.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_popup_event_stream_starts_with_snapshot() {
    let server = TestServer::start().await;

    let mut resp = server.get("/api/error-log/popup/wall/events").await;
    assert_eq!(resp.status(), 200);
    let first = tokio::time::timeout(TIMEOUT, resp.chunk())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&first);
    assert!(text.contains("event: snapshot"), "{text}");
    assert!(server.pedestal.error_log().is_popup_open("wall"));

    server.stop().await;
}

#[tokio::test]
async fn test_stow_endpoints() {
    let server = TestServer::start().await;

    let state: Value = server.get("/api/stow").await.json().await.unwrap();
    assert_eq!(state["state"], "idle");

    let resp = server.post("/api/commands/stow", json!({})).await;
    assert_eq!(resp.status(), 202);
    // Simulator train axis starts at the stow angle
    assert!(
        wait_for(TIMEOUT, || {
            server.pedestal.stow().state() == pedestal_types::StowState::Completed
        })
        .await
    );
    let state: Value = server.get("/api/stow").await.json().await.unwrap();
    assert_eq!(state["state"], "completed");

    server.stop().await;
}

#[tokio::test]
async fn test_stop_publishes_tracking_event() {
    let server = TestServer::start().await;

    let mut events = server.get("/api/events/tracking").await;
    assert_eq!(events.status(), 200);
    let resp = server
        .post("/api/commands/stop", json!({ "axes": ["azimuth"] }))
        .await;
    assert_eq!(resp.status(), 202);

    let chunk = tokio::time::timeout(TIMEOUT, events.chunk())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: tracking"), "{text}");
    assert!(text.contains("stopAllTracking"), "{text}");

    server.stop().await;
}
