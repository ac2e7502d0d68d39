use std::net::SocketAddr;
use std::time::Duration;

use pedestal::sim::{serve_udp, FirmwareSimulator, SharedSimulator};
use pedestal::PedestalConfig;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct MockFirmware {
    pub addr: SocketAddr,
    pub sim: SharedSimulator,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MockFirmware {
    pub async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let sim = FirmwareSimulator::shared();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve_udp(socket, sim.clone(), cancel.clone()));
        Self {
            addr,
            sim,
            cancel,
            task,
        }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

pub fn udp_config(firmware: SocketAddr) -> PedestalConfig {
    let mut config = PedestalConfig::default();
    config.link.firmware_address = firmware.to_string();
    config.link.local_address = "127.0.0.1:0".to_string();
    config.link.channel_reconnect_delay = Duration::from_millis(100);
    config.link.reconnect_delay = Duration::from_millis(50);
    config.error_log.popup_push_interval = Duration::from_millis(50);
    config
}

/// Poll `condition` every 10 ms until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
