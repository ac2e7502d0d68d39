mod common;

use std::time::Duration;

use common::{udp_config, wait_for, MockFirmware};
use icd::{Axis, AxisMotion, AxisSet, EmergencyCommand, StatusRegister};
use pedestal::{AxisValues, Pedestal, SnapshotProvider};
use pedestal_types::Severity;

const TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_status_frames_over_localhost() {
    let firmware = MockFirmware::start().await;
    let pedestal = Pedestal::udp(udp_config(firmware.addr)).unwrap();
    pedestal.start();

    assert!(wait_for(TIMEOUT, || pedestal.link().health().healthy).await);
    let health = pedestal.link().health();
    assert!(health.connected);
    assert!(health.packets_sent > 0);
    assert!(health.status_frames > 0);
    assert_eq!(health.decode_errors, 0);
    assert_eq!(health.firmware_address, firmware.addr.to_string());
    assert!(pedestal.error_log().is_empty());

    pedestal.shutdown().await;
    assert!(!pedestal.link().health().running);
    firmware.stop().await;
}

#[tokio::test]
async fn test_firmware_fault_logged_then_resolved() {
    let firmware = MockFirmware::start().await;
    let pedestal = Pedestal::udp(udp_config(firmware.addr)).unwrap();
    pedestal.start();
    assert!(wait_for(TIMEOUT, || pedestal.link().health().healthy).await);

    firmware
        .sim
        .lock()
        .unwrap()
        .inject_fault(StatusRegister::FeedXBoard, 2, true);
    assert!(wait_for(TIMEOUT, || !pedestal.error_log().active().is_empty()).await);
    let active = pedestal.error_log().active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].error_key, "LO_UNLOCKED");
    assert_eq!(active[0].component, "FEED_X_BOARD");
    assert_eq!(active[0].severity, Severity::Error);

    firmware
        .sim
        .lock()
        .unwrap()
        .inject_fault(StatusRegister::FeedXBoard, 2, false);
    assert!(wait_for(TIMEOUT, || pedestal.error_log().active().is_empty()).await);
    let all = pedestal.error_log().all();
    assert_eq!(all.len(), 2);
    assert!(all[1].is_resolved);
    assert_eq!(all[1].severity, Severity::Info);

    pedestal.shutdown().await;
    firmware.stop().await;
}

#[tokio::test]
async fn test_manual_control_moves_axis() {
    let firmware = MockFirmware::start().await;
    let pedestal = Pedestal::udp(udp_config(firmware.addr)).unwrap();
    pedestal.start();
    assert!(wait_for(TIMEOUT, || pedestal.link().health().healthy).await);

    pedestal
        .dispatcher()
        .manual_control(
            AxisSet::ELEVATION,
            AxisValues {
                elevation: AxisMotion::new(5.0, 50.0),
                ..Default::default()
            },
        )
        .outcome()
        .await
        .unwrap();

    let reached = wait_for(TIMEOUT, || {
        pedestal
            .snapshot()
            .latest()
            .is_some_and(|d| (d.angle(Axis::Elevation) - 5.0).abs() < 1e-3)
    })
    .await;
    assert!(reached);
    // Unselected axes were held
    assert_eq!(firmware.sim.lock().unwrap().angle(Axis::Azimuth), 0.0);

    pedestal.shutdown().await;
    firmware.stop().await;
}

#[tokio::test]
async fn test_emergency_stop_round_trip() {
    let firmware = MockFirmware::start().await;
    let pedestal = Pedestal::udp(udp_config(firmware.addr)).unwrap();
    pedestal.start();
    assert!(wait_for(TIMEOUT, || pedestal.link().health().healthy).await);

    pedestal
        .dispatcher()
        .emergency(EmergencyCommand::Activate)
        .outcome()
        .await
        .unwrap();
    assert!(
        wait_for(TIMEOUT, || {
            pedestal.error_log().status_bar(chrono::Utc::now()).critical_count == 1
        })
        .await
    );
    let bar = pedestal.error_log().status_bar(chrono::Utc::now());
    assert!(bar.has_active_errors);
    assert_eq!(bar.latest.unwrap().error_key, "EMERGENCY_STOP");

    pedestal
        .dispatcher()
        .emergency(EmergencyCommand::Release)
        .outcome()
        .await
        .unwrap();
    assert!(
        wait_for(TIMEOUT, || {
            !pedestal.error_log().status_bar(chrono::Utc::now()).has_active_errors
        })
        .await
    );
    // The resolution stays visible in the status bar for a while
    let bar = pedestal.error_log().status_bar(chrono::Utc::now());
    assert!(bar.latest.unwrap().is_resolved);

    pedestal.shutdown().await;
    firmware.stop().await;
}

#[tokio::test]
async fn test_operator_reconnect() {
    let firmware = MockFirmware::start().await;
    let pedestal = Pedestal::udp(udp_config(firmware.addr)).unwrap();
    pedestal.start();
    assert!(wait_for(TIMEOUT, || pedestal.link().health().healthy).await);

    assert!(pedestal.link().reconnect().await);
    let frames = pedestal.link().health().status_frames;
    assert!(wait_for(TIMEOUT, || pedestal.link().health().status_frames > frames).await);
    assert!(pedestal.link().health().running);

    pedestal.shutdown().await;
    firmware.stop().await;
}
