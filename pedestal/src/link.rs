//! UDP link lifecycle and the receive pipeline
//!
//! [`PedestalLink`] owns the channel and the scheduler. Initialization
//! opens a channel through the [`ChannelFactory`], retrying forever at the
//! channel reconnect delay, then starts both loops:
//!
//! - receive: drain pending datagrams through [`ReceivePipeline`]
//! - send: transmit a ReadStatus poll stamped with the adjusted UTC time
//!
//! Teardown always stops the loops before closing the channel.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use icd::{decode_reply, Command, Reply};
use pedestal_types::UdpHealth;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::control_state::ControlState;
use crate::dispatch::Transmitter;
use crate::error::{PedestalResult, TransportError};
use crate::error_log::ErrorLogStore;
use crate::metrics::LinkMetrics;
use crate::scheduler::{LoopTiming, Scheduler};
use crate::snapshot::{FirmwareCell, SnapshotCell};
use crate::status_diff::StatusDiffEngine;
use crate::transport::{Channel, ChannelFactory};

/// Decode, publish and diff everything the firmware sends.
pub struct ReceivePipeline {
    snapshot: Arc<SnapshotCell>,
    firmware: Arc<FirmwareCell>,
    diff: StatusDiffEngine,
    error_log: Arc<ErrorLogStore>,
    metrics: Arc<LinkMetrics>,
    max_datagrams_per_tick: usize,
}

impl ReceivePipeline {
    pub fn new(
        snapshot: Arc<SnapshotCell>,
        firmware: Arc<FirmwareCell>,
        error_log: Arc<ErrorLogStore>,
        metrics: Arc<LinkMetrics>,
        max_datagrams_per_tick: usize,
    ) -> Self {
        Self {
            snapshot,
            firmware,
            diff: StatusDiffEngine::new(),
            error_log,
            metrics,
            max_datagrams_per_tick: max_datagrams_per_tick.max(1),
        }
    }

    pub fn diff_engine(&self) -> &StatusDiffEngine {
        &self.diff
    }

    /// Handle one datagram. Malformed datagrams are counted and dropped.
    pub fn handle_datagram(&self, bytes: &[u8]) {
        self.metrics.packet_received();
        match decode_reply(bytes) {
            Ok(Reply::Status(data)) => {
                self.metrics.status_frame();
                let drafts = self.diff.apply(&data, Utc::now());
                self.snapshot.publish(Arc::new(data));
                for entry in self.error_log.record_batch(drafts) {
                    self.metrics.error_logged(entry.severity.as_str());
                    if entry.is_resolved {
                        info!("Resolved {} on {}", entry.error_key, entry.component);
                    } else {
                        warn!(
                            "{} {} on {} ({})",
                            entry.severity, entry.error_key, entry.component, entry.category
                        );
                    }
                }
            }
            Ok(Reply::FirmwareInfo(info)) => {
                info!(
                    "Firmware versions: main {}, azimuth {}, elevation {}, train {}, feed {}",
                    info.main, info.azimuth, info.elevation, info.train, info.feed
                );
                self.firmware.publish(info);
            }
            Err(e) => {
                self.metrics.decode_error();
                debug!("Dropping {} byte datagram: {}", bytes.len(), e);
            }
        }
    }

    /// Drain up to the per-tick limit of pending datagrams.
    pub fn poll_once(&self, channel: &dyn Channel) -> Result<usize, TransportError> {
        let mut handled = 0;
        while handled < self.max_datagrams_per_tick {
            match channel.try_receive()? {
                Some(bytes) => {
                    self.handle_datagram(&bytes);
                    handled += 1;
                }
                None => break,
            }
        }
        Ok(handled)
    }
}

pub struct PedestalLink {
    config: LinkConfig,
    factory: Arc<dyn ChannelFactory>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    scheduler: Mutex<Option<Scheduler>>,
    lifecycle: tokio::sync::Mutex<()>,
    pipeline: Arc<ReceivePipeline>,
    control: Arc<ControlState>,
    snapshot: Arc<SnapshotCell>,
    metrics: Arc<LinkMetrics>,
    shutdown: CancellationToken,
}

impl PedestalLink {
    pub fn new(
        config: LinkConfig,
        factory: Arc<dyn ChannelFactory>,
        pipeline: Arc<ReceivePipeline>,
        control: Arc<ControlState>,
        snapshot: Arc<SnapshotCell>,
        metrics: Arc<LinkMetrics>,
    ) -> Self {
        Self {
            config,
            factory,
            channel: RwLock::new(None),
            scheduler: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            pipeline,
            control,
            snapshot,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<Scheduler>> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler().as_ref().is_some_and(|s| s.is_running())
    }

    /// Open the channel and start both loops, retrying until it works.
    /// Returns false if shutdown interrupted initialization.
    pub async fn connect(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> bool {
        if self.is_running() {
            return true;
        }
        loop {
            if self.shutdown.is_cancelled() {
                return false;
            }
            match self.factory.open() {
                Ok(channel) => {
                    self.start_loops(channel);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "UDP initialization failed ({} -> {}): {}; retrying in {:?}",
                        self.factory.local_address(),
                        self.factory.firmware_address(),
                        e,
                        self.config.channel_reconnect_delay
                    );
                }
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                _ = sleep(self.config.channel_reconnect_delay) => {}
            }
        }
    }

    fn start_loops(&self, channel: Arc<dyn Channel>) {
        *self.channel.write().unwrap_or_else(|e| e.into_inner()) = Some(channel.clone());

        let receive_channel = channel.clone();
        let pipeline = self.pipeline.clone();
        let receive_tick = move || -> PedestalResult<()> {
            pipeline.poll_once(receive_channel.as_ref())?;
            Ok(())
        };

        let control = self.control.clone();
        let metrics = self.metrics.clone();
        let send_tick = move || -> PedestalResult<()> {
            let poll = Command::ReadStatus {
                time: control.utc_now(),
            }
            .encode();
            match channel.send(&poll) {
                Ok(()) => {
                    metrics.packet_sent();
                    Ok(())
                }
                Err(e) => {
                    metrics.send_error();
                    Err(e.into())
                }
            }
        };

        let scheduler = Scheduler::start(
            LoopTiming {
                period: self.config.receive_interval,
                warn_threshold: self.config.receive_warn_threshold,
            },
            LoopTiming {
                period: self.config.send_interval,
                warn_threshold: self.config.send_warn_threshold,
            },
            self.metrics.clone(),
            receive_tick,
            send_tick,
        );
        *self.scheduler() = Some(scheduler);
        info!(
            "UDP link up ({} -> {})",
            self.factory.local_address(),
            self.factory.firmware_address()
        );
    }

    /// Stop the loops, then close the channel.
    async fn disconnect_locked(&self) {
        let scheduler = self.scheduler().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        let channel = self
            .channel
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(channel) = channel {
            channel.close();
        }
    }

    /// Tear the link down, wait the reconnect delay and initialize again.
    pub async fn reconnect(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Reconnecting UDP link");
        self.disconnect_locked().await;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return false,
            _ = sleep(self.config.reconnect_delay) => {}
        }
        self.connect_locked().await
    }

    /// Stop for good. Interrupts a pending initialization.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let _lifecycle = self.lifecycle.lock().await;
        self.disconnect_locked().await;
        self.metrics.set_link_state(false, false);
        info!("UDP link shut down");
    }

    pub fn health(&self) -> UdpHealth {
        let running = self.is_running();
        let age = self.snapshot.age();
        let healthy = running && age.is_some_and(|a| a <= self.config.health_timeout);
        self.metrics.set_link_state(running, healthy);

        let channel = self.channel();
        UdpHealth {
            running,
            healthy,
            connected: channel.as_ref().is_some_and(|c| c.is_open()),
            local_address: self.factory.local_address(),
            firmware_address: self.factory.firmware_address(),
            packets_sent: self.metrics.packets_sent(),
            packets_received: self.metrics.packets_received(),
            status_frames: self.metrics.status_frames(),
            send_errors: self.metrics.send_errors(),
            decode_errors: self.metrics.decode_errors(),
            rejected_datagrams: channel.map(|c| c.rejected_datagrams()).unwrap_or(0),
            tick_failures: self.metrics.tick_failures(),
            slow_ticks: self.metrics.slow_ticks(),
            last_status_age_ms: age.map(|a| a.as_millis() as u64),
        }
    }
}

impl Transmitter for PedestalLink {
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError> {
        let channel = self.channel().ok_or(TransportError::Closed)?;
        match channel.send(frame) {
            Ok(()) => {
                self.metrics.packet_sent();
                Ok(())
            }
            Err(e) => {
                self.metrics.send_error();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorLogConfig;
    use crate::sim::{FirmwareSimulator, SimChannelFactory};
    use crate::snapshot::SnapshotProvider;
    use icd::{ReadData, StatusRegister};
    use std::time::Duration;

    struct Harness {
        link: Arc<PedestalLink>,
        factory: Arc<SimChannelFactory>,
        snapshot: Arc<SnapshotCell>,
        firmware: Arc<FirmwareCell>,
        error_log: Arc<ErrorLogStore>,
        metrics: Arc<LinkMetrics>,
    }

    fn harness(factory: SimChannelFactory) -> Harness {
        let factory = Arc::new(factory);
        let snapshot = Arc::new(SnapshotCell::new());
        let firmware = Arc::new(FirmwareCell::new());
        let error_log = Arc::new(ErrorLogStore::new(&ErrorLogConfig::default()));
        let metrics = Arc::new(LinkMetrics::new().unwrap());
        let pipeline = Arc::new(ReceivePipeline::new(
            snapshot.clone(),
            firmware.clone(),
            error_log.clone(),
            metrics.clone(),
            32,
        ));
        let link = Arc::new(PedestalLink::new(
            LinkConfig::default(),
            factory.clone(),
            pipeline,
            Arc::new(ControlState::new()),
            snapshot.clone(),
            metrics.clone(),
        ));
        Harness {
            link,
            factory,
            snapshot,
            firmware,
            error_log,
            metrics,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_polls_and_decodes() {
        let sim = FirmwareSimulator::shared();
        let h = harness(SimChannelFactory::new(sim.clone()));
        assert!(h.link.connect().await);

        tokio::time::sleep(Duration::from_millis(105)).await;
        let health = h.link.health();
        assert!(health.running);
        assert!(health.healthy);
        assert!(health.connected);
        // Polls at 0, 30, 60 and 90 ms, each answered within one receive period
        assert_eq!(health.packets_sent, 4);
        assert_eq!(health.status_frames, 4);
        assert!(h.snapshot.latest().is_some());

        h.link.shutdown().await;
        let health = h.link.health();
        assert!(!health.running);
        assert!(!health.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_faults_reach_error_log() {
        let sim = FirmwareSimulator::shared();
        let h = harness(SimChannelFactory::new(sim.clone()));
        assert!(h.link.connect().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.error_log.is_empty());

        sim.lock()
            .unwrap()
            .inject_fault(StatusRegister::AzimuthBoardServo, 0, true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let active = h.error_log.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].error_key, "SERVO_ALARM");
        assert_eq!(active[0].component, "AZIMUTH_BOARD");

        sim.lock()
            .unwrap()
            .inject_fault(StatusRegister::AzimuthBoardServo, 0, false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.error_log.active().is_empty());
        assert_eq!(h.error_log.len(), 2);
        assert_eq!(h.metrics.decode_errors(), 0);
        h.link.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_retries_at_fixed_delay() {
        let sim = FirmwareSimulator::shared();
        let h = harness(SimChannelFactory::new(sim).failing(2));

        let started = tokio::time::Instant::now();
        assert!(h.link.connect().await);
        assert_eq!(h.factory.attempts(), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(h.link.is_running());
        h.link.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_init() {
        let sim = FirmwareSimulator::shared();
        let h = harness(SimChannelFactory::new(sim).failing(usize::MAX));
        let link = h.link.clone();
        let connecting = tokio::spawn(async move { link.connect().await });

        tokio::time::sleep(Duration::from_secs(12)).await;
        h.link.shutdown().await;
        assert!(!connecting.await.unwrap());
        assert!(!h.link.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_reopens_channel() {
        let sim = FirmwareSimulator::shared();
        let h = harness(SimChannelFactory::new(sim));
        assert!(h.link.connect().await);
        assert!(h.link.reconnect().await);
        assert_eq!(h.factory.attempts(), 2);
        assert!(h.link.is_running());
        h.link.shutdown().await;
    }

    #[tokio::test]
    async fn test_transmit_without_channel_fails() {
        let sim = FirmwareSimulator::shared();
        let h = harness(SimChannelFactory::new(sim));
        assert!(matches!(
            h.link.transmit(&Command::FirmwareInfoRequest.encode()),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_pipeline_drops_garbage_and_stores_firmware_info() {
        let h = harness(SimChannelFactory::new(FirmwareSimulator::shared()));
        let pipeline = ReceivePipeline::new(
            h.snapshot.clone(),
            h.firmware.clone(),
            h.error_log.clone(),
            h.metrics.clone(),
            32,
        );

        pipeline.handle_datagram(&[0x02, 0x00, 0x03]);
        assert_eq!(h.metrics.decode_errors(), 1);
        assert!(h.snapshot.latest().is_none());

        let info = FirmwareSimulator::new().firmware_info();
        pipeline.handle_datagram(&info.encode());
        assert_eq!(h.firmware.latest(), Some(info));

        let mut data = ReadData::default();
        data.registers.set(StatusRegister::MainBoardStatus, 0b0000_0001);
        pipeline.handle_datagram(&data.encode());
        assert_eq!(h.error_log.len(), 1);
        assert_eq!(
            pipeline.diff_engine().state().get(StatusRegister::MainBoardStatus),
            1
        );
    }
}
