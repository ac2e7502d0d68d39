//! The assembled pedestal service.
//!
//! [`Pedestal`] owns one of everything: the link, the command dispatcher,
//! the stow sequencer and the error log, wired to shared snapshot and
//! control state. The HTTP API and the binaries only talk to this type.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PedestalConfig;
use crate::control_state::ControlState;
use crate::dispatch::{CommandDispatcher, DispatchContext, Transmitter};
use crate::error::{panic_message, PedestalResult};
use crate::error_log::ErrorLogStore;
use crate::events::{EventBus, EventPublisher};
use crate::link::{PedestalLink, ReceivePipeline};
use crate::metrics::LinkMetrics;
use crate::snapshot::{FirmwareCell, SnapshotCell, SnapshotProvider};
use crate::stow::{StowSequencer, StowSlot};
use crate::transport::{ChannelFactory, UdpChannelFactory};

pub struct Pedestal {
    config: PedestalConfig,
    metrics: Arc<LinkMetrics>,
    snapshot: Arc<SnapshotCell>,
    firmware: Arc<FirmwareCell>,
    control: Arc<ControlState>,
    events: Arc<EventBus>,
    error_log: Arc<ErrorLogStore>,
    link: Arc<PedestalLink>,
    dispatcher: Arc<CommandDispatcher>,
    stow: StowSequencer,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pedestal {
    /// Wire the service together over `factory`. Must be called inside a
    /// tokio runtime; nothing talks to the firmware until [`Pedestal::start`].
    pub fn new(
        config: PedestalConfig,
        factory: Arc<dyn ChannelFactory>,
    ) -> PedestalResult<Arc<Self>> {
        let metrics = Arc::new(LinkMetrics::new()?);
        let snapshot = Arc::new(SnapshotCell::new());
        let firmware = Arc::new(FirmwareCell::new());
        let control = Arc::new(ControlState::new());
        let events = Arc::new(EventBus::default());
        let error_log = Arc::new(ErrorLogStore::new(&config.error_log));

        let pipeline = Arc::new(ReceivePipeline::new(
            snapshot.clone(),
            firmware.clone(),
            error_log.clone(),
            metrics.clone(),
            config.link.max_datagrams_per_tick,
        ));
        let link = Arc::new(PedestalLink::new(
            config.link.clone(),
            factory,
            pipeline,
            control.clone(),
            snapshot.clone(),
            metrics.clone(),
        ));

        let slot = Arc::new(StowSlot::new());
        let snapshot_provider: Arc<dyn SnapshotProvider> = snapshot.clone();
        let publisher: Arc<dyn EventPublisher> = events.clone();
        let transmitter: Arc<dyn Transmitter> = link.clone();
        let (dispatcher, worker) = CommandDispatcher::spawn(
            transmitter,
            DispatchContext {
                snapshot: snapshot_provider.clone(),
                control: control.clone(),
            },
            publisher.clone(),
            slot.clone(),
            metrics.clone(),
        );
        let dispatcher = Arc::new(dispatcher);
        let stow = StowSequencer::new(
            slot,
            dispatcher.clone(),
            snapshot_provider,
            publisher,
            config.stow.clone(),
        );

        Ok(Arc::new(Self {
            config,
            metrics,
            snapshot,
            firmware,
            control,
            events,
            error_log,
            link,
            dispatcher,
            stow,
            tasks: Mutex::new(vec![worker]),
        }))
    }

    /// Service talking to real firmware over UDP.
    pub fn udp(config: PedestalConfig) -> PedestalResult<Arc<Self>> {
        let factory = Arc::new(UdpChannelFactory::new(
            config.link.local_address.clone(),
            config.link.firmware_address.clone(),
            config.link.max_buffer_size,
        ));
        Self::new(config, factory)
    }

    /// Begin link initialization in the background.
    pub fn start(&self) {
        info!(
            "Starting pedestal link {} -> {}",
            self.config.link.local_address, self.config.link.firmware_address
        );
        let link = self.link.clone();
        let task = tokio::spawn(async move {
            if !link.connect().await {
                info!("Link initialization abandoned");
            }
        });
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(task);
    }

    /// Cancel any stow, stop the link and drain the command worker.
    pub async fn shutdown(&self) {
        info!("Shutting down pedestal service");
        self.stow.cancel();
        self.link.shutdown().await;
        self.dispatcher.shutdown();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("Service task panicked: {}", panic_message(e.into_panic().as_ref()));
                }
            }
        }
    }

    pub fn config(&self) -> &PedestalConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<LinkMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> &Arc<SnapshotCell> {
        &self.snapshot
    }

    pub fn firmware(&self) -> &Arc<FirmwareCell> {
        &self.firmware
    }

    pub fn control(&self) -> &Arc<ControlState> {
        &self.control
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn error_log(&self) -> &Arc<ErrorLogStore> {
        &self.error_log
    }

    pub fn link(&self) -> &Arc<PedestalLink> {
        &self.link
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn stow(&self) -> &StowSequencer {
        &self.stow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FirmwareSimulator, SimChannelFactory};
    use icd::{Axis, AxisMotion, AxisSet};
    use pedestal_types::StowState;
    use std::time::Duration;

    use crate::control_state::AxisValues;

    #[tokio::test(start_paused = true)]
    async fn test_commands_reach_simulator() {
        let sim = FirmwareSimulator::shared();
        let pedestal = Pedestal::new(
            PedestalConfig::default(),
            Arc::new(SimChannelFactory::new(sim.clone())),
        )
        .unwrap();
        pedestal.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pedestal.link().is_running());

        pedestal
            .dispatcher()
            .manual_control(
                AxisSet::AZIMUTH,
                AxisValues {
                    azimuth: AxisMotion::new(20.0, 10.0),
                    ..Default::default()
                },
            )
            .outcome()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let latest = pedestal.snapshot().latest().unwrap();
        assert!((latest.angle(Axis::Azimuth) - 20.0).abs() < 1e-3);
        assert_eq!(pedestal.control().commanded_angle(Axis::Azimuth), Some(20.0));

        pedestal.dispatcher().firmware_info_request().outcome().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            pedestal.firmware().latest(),
            Some(sim.lock().unwrap().firmware_info())
        );

        pedestal.shutdown().await;
        assert!(!pedestal.link().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stow_completes_against_simulator() {
        let sim = FirmwareSimulator::shared();
        sim.lock().unwrap().set_angle(Axis::Train, 10.0);
        sim.lock().unwrap().set_angle(Axis::Elevation, 45.0);
        let pedestal = Pedestal::new(
            PedestalConfig::default(),
            Arc::new(SimChannelFactory::new(sim.clone())),
        )
        .unwrap();
        pedestal.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = pedestal.stow().subscribe();
        pedestal.stow().start().await.unwrap();
        assert_eq!(pedestal.stow().state(), StowState::Completed);
        assert!(state.has_changed().unwrap());

        // Elevation still slewing to 90 at 5 deg/s
        tokio::time::sleep(Duration::from_secs(12)).await;
        let sim = sim.lock().unwrap();
        assert!(sim.angle(Axis::Train).abs() < 1e-3);
        assert!((sim.angle(Axis::Elevation) - 90.0).abs() < 1e-3);
        drop(sim);
        pedestal.shutdown().await;
    }
}
