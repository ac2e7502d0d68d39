//! Command dispatch
//!
//! One method per ICD command kind. Every method returns immediately with a
//! [`CommandHandle`]; the frame is built, encoded and transmitted later by a
//! single worker task draining a FIFO queue, so a slow command never holds
//! up the scheduler loops. Failures are logged and counted by the worker.
//! Callers may drop the handle (fire-and-forget) or await it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use icd::{
    Axis, AxisMotion, AxisSet, Command, CommandError, CommandKind, EmergencyCommand, FeedSet,
    IcdTime,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control_state::{AxisValues, ControlState};
use crate::error::{panic_message, PedestalError, PedestalResult, TransportError};
use crate::events::{EventPublisher, TrackingEvent};
use crate::metrics::LinkMetrics;
use crate::snapshot::SnapshotProvider;
use crate::stow::StowSlot;

/// Sends one encoded frame to the firmware.
pub trait Transmitter: Send + Sync {
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError>;
}

/// What a command builder can read when it runs.
pub struct DispatchContext {
    pub snapshot: Arc<dyn SnapshotProvider>,
    pub control: Arc<ControlState>,
}

impl DispatchContext {
    /// Latest reported angle, or 0 before the first status frame.
    pub fn current_angle(&self, axis: Axis) -> f32 {
        self.snapshot.latest().map(|d| d.angle(axis)).unwrap_or(0.0)
    }
}

type Builder = Box<dyn FnOnce(&DispatchContext) -> Command + Send>;

struct Job {
    kind: CommandKind,
    build: Builder,
    reply: oneshot::Sender<PedestalResult<()>>,
}

/// Outcome of one dispatched command.
#[must_use = "drop the handle explicitly to fire and forget"]
pub struct CommandHandle {
    kind: CommandKind,
    rx: oneshot::Receiver<PedestalResult<()>>,
}

impl CommandHandle {
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Wait for the worker to transmit (or fail to transmit) the frame.
    pub async fn outcome(self) -> PedestalResult<()> {
        self.rx.await.unwrap_or(Err(PedestalError::QueueClosed))
    }
}

pub struct CommandDispatcher {
    tx: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
    control: Arc<ControlState>,
    events: Arc<dyn EventPublisher>,
    stow: Arc<StowSlot>,
}

impl CommandDispatcher {
    /// Create the dispatcher and spawn its worker.
    pub fn spawn(
        transmitter: Arc<dyn Transmitter>,
        context: DispatchContext,
        events: Arc<dyn EventPublisher>,
        stow: Arc<StowSlot>,
        metrics: Arc<LinkMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let control = context.control.clone();
        let worker = tokio::spawn(run_worker(rx, cancel.clone(), transmitter, context, metrics));
        (
            Self {
                tx,
                cancel,
                control,
                events,
                stow,
            },
            worker,
        )
    }

    fn submit<F>(&self, kind: CommandKind, build: F) -> CommandHandle
    where
        F: FnOnce(&DispatchContext) -> Command + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            kind,
            build: Box::new(build),
            reply,
        };
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            warn!("Dropping {} command: queue is shut down", kind);
            let _ = job.reply.send(Err(PedestalError::QueueClosed));
        }
        CommandHandle { kind, rx }
    }

    /// Move the selected axes to `targets`. Unselected axes hold their
    /// current reported angle.
    pub fn manual_control(&self, axes: AxisSet, targets: AxisValues<AxisMotion>) -> CommandHandle {
        self.control
            .record_commanded(axes, |axis| targets.get(axis).angle);
        self.submit(CommandKind::ManualControl, move |ctx| {
            let motion = |axis: Axis| {
                if axes.selects(axis) {
                    targets.get(axis)
                } else {
                    AxisMotion::hold(ctx.current_angle(axis))
                }
            };
            Command::ManualControl {
                axes,
                azimuth: motion(Axis::Azimuth),
                elevation: motion(Axis::Elevation),
                train: motion(Axis::Train),
            }
        })
    }

    /// Stop the selected axes. Halts tracking and cancels any stow first.
    pub fn stop(&self, axes: AxisSet) -> CommandHandle {
        self.stow.cancel_active();
        self.events.publish(TrackingEvent::StopAllTracking);
        self.submit(CommandKind::Stop, move |_| Command::Stop { axes })
    }

    pub fn standby(&self, axes: AxisSet) -> CommandHandle {
        self.submit(CommandKind::Standby, move |_| Command::Standby { axes })
    }

    pub fn emergency(&self, command: EmergencyCommand) -> CommandHandle {
        self.submit(CommandKind::Emergency, move |_| Command::Emergency { command })
    }

    /// Parse an emergency code character and dispatch it. Unknown codes are
    /// rejected before anything is queued.
    pub fn emergency_char(&self, code: char) -> Result<CommandHandle, CommandError> {
        let command = EmergencyCommand::try_from(code)?;
        Ok(self.emergency(command))
    }

    /// Apply tracking position offsets to the selected axes. Unselected
    /// axes keep their last recorded offset.
    pub fn position_offset(&self, axes: AxisSet, offsets: AxisValues<f32>) -> CommandHandle {
        self.control.record_offsets(axes, |axis| offsets.get(axis));
        self.submit(CommandKind::PositionOffset, move |ctx| {
            let offset = |axis: Axis| {
                if axes.selects(axis) {
                    offsets.get(axis)
                } else {
                    ctx.control.position_offset(axis)
                }
            };
            Command::PositionOffset {
                axes,
                azimuth: offset(Axis::Azimuth),
                elevation: offset(Axis::Elevation),
                train: offset(Axis::Train),
            }
        })
    }

    /// Set the clock offset applied to every UTC field the server sends.
    /// The frame itself carries the unadjusted current time.
    pub fn time_offset(&self, offset_ms: f32) -> CommandHandle {
        self.control.set_time_offset_ms(offset_ms);
        self.submit(CommandKind::TimeOffset, move |_| Command::TimeOffset {
            time: IcdTime::now(),
            offset_ms,
        })
    }

    pub fn feed_on_off(&self, feeds: FeedSet) -> CommandHandle {
        self.submit(CommandKind::FeedOnOff, move |_| Command::FeedOnOff { feeds })
    }

    /// Servo preset. Cancels any stow in progress.
    pub fn servo_preset(&self, axes: AxisSet) -> CommandHandle {
        self.stow.cancel_active();
        self.submit(CommandKind::ServoPreset, move |_| Command::ServoPreset { axes })
    }

    pub fn servo_alarm_reset(&self, axes: AxisSet) -> CommandHandle {
        self.submit(CommandKind::ServoAlarmReset, move |_| {
            Command::ServoAlarmReset { axes }
        })
    }

    pub fn firmware_info_request(&self) -> CommandHandle {
        self.submit(CommandKind::FirmwareInfoRequest, |_| {
            Command::FirmwareInfoRequest
        })
    }

    pub fn time_sync(&self) -> CommandHandle {
        self.submit(CommandKind::TimeSync, |ctx| Command::TimeSync {
            time: ctx.control.utc_now(),
        })
    }

    /// Stop the worker. Queued commands that have not run are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    cancel: CancellationToken,
    transmitter: Arc<dyn Transmitter>,
    context: DispatchContext,
    metrics: Arc<LinkMetrics>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let Job { kind, build, reply } = job;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let command = build(&context);
            let frame = command.encode();
            debug!("Transmitting {} ({} bytes)", kind, frame.len());
            transmitter.transmit(&frame)
        }));
        let result = match result {
            Ok(Ok(())) => {
                metrics.command_sent(kind.name());
                Ok(())
            }
            Ok(Err(e)) => {
                metrics.command_failed(kind.name());
                warn!("{} command failed: {}", kind, e);
                Err(PedestalError::Transport(e))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                metrics.command_failed(kind.name());
                warn!("{} command panicked: {}", kind, message);
                Err(PedestalError::Panicked(message))
            }
        };
        let _ = reply.send(result);
    }
    info!("Command worker stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::snapshot::SnapshotCell;
    use icd::ReadData;
    use pedestal_types::{StowFailure, StowState};
    use std::sync::Mutex;

    /// Records every transmitted frame; optionally fails every send.
    #[derive(Default)]
    pub(crate) struct RecordingTransmitter {
        pub frames: Mutex<Vec<Vec<u8>>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingTransmitter {
        pub fn commands(&self) -> Vec<Command> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .map(|f| Command::decode(f).unwrap())
                .collect()
        }
    }

    impl Transmitter for RecordingTransmitter {
        fn transmit(&self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    pub(crate) struct Fixture {
        pub dispatcher: Arc<CommandDispatcher>,
        pub transmitter: Arc<RecordingTransmitter>,
        pub snapshot: Arc<SnapshotCell>,
        pub control: Arc<ControlState>,
        pub events: Arc<EventBus>,
        pub stow: Arc<StowSlot>,
        pub metrics: Arc<LinkMetrics>,
    }

    pub(crate) fn fixture() -> Fixture {
        let transmitter = Arc::new(RecordingTransmitter::default());
        let snapshot = Arc::new(SnapshotCell::new());
        let control = Arc::new(ControlState::new());
        let events = Arc::new(EventBus::default());
        let stow = Arc::new(StowSlot::new());
        let metrics = Arc::new(LinkMetrics::new().unwrap());
        let (dispatcher, _worker) = CommandDispatcher::spawn(
            transmitter.clone(),
            DispatchContext {
                snapshot: snapshot.clone(),
                control: control.clone(),
            },
            events.clone(),
            stow.clone(),
            metrics.clone(),
        );
        Fixture {
            dispatcher: Arc::new(dispatcher),
            transmitter,
            snapshot,
            control,
            events,
            stow,
            metrics,
        }
    }

    fn targets(az: f32, el: f32, train: f32) -> AxisValues<AxisMotion> {
        AxisValues {
            azimuth: AxisMotion::new(az, 2.0),
            elevation: AxisMotion::new(el, 2.0),
            train: AxisMotion::new(train, 2.0),
        }
    }

    #[tokio::test]
    async fn test_manual_control_holds_unselected_axes() {
        let f = fixture();
        f.snapshot.publish(Arc::new(ReadData {
            azimuth_angle: 120.0,
            elevation_angle: 45.0,
            train_angle: 3.0,
            ..Default::default()
        }));

        f.dispatcher
            .manual_control(AxisSet::ELEVATION, targets(10.0, 60.0, 20.0))
            .outcome()
            .await
            .unwrap();

        let sent = f.transmitter.commands();
        assert_eq!(
            sent,
            vec![Command::ManualControl {
                axes: AxisSet::ELEVATION,
                azimuth: AxisMotion::hold(120.0),
                elevation: AxisMotion::new(60.0, 2.0),
                train: AxisMotion::hold(3.0),
            }]
        );
        assert_eq!(f.control.commanded_angle(Axis::Elevation), Some(60.0));
        assert_eq!(f.control.commanded_angle(Axis::Azimuth), None);
        assert_eq!(f.metrics.commands_sent_of("ManualControl"), 1);
    }

    #[tokio::test]
    async fn test_manual_control_without_snapshot_holds_zero() {
        let f = fixture();
        f.dispatcher
            .manual_control(AxisSet::AZIMUTH, targets(10.0, 60.0, 20.0))
            .outcome()
            .await
            .unwrap();
        match &f.transmitter.commands()[0] {
            Command::ManualControl {
                elevation, train, ..
            } => {
                assert_eq!(*elevation, AxisMotion::hold(0.0));
                assert_eq!(*train, AxisMotion::hold(0.0));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_transmit_in_submission_order() {
        let f = fixture();
        let _ = f.dispatcher.standby(AxisSet::ALL_AXES);
        let _ = f.dispatcher.feed_on_off(FeedSet::X_RX);
        f.dispatcher.firmware_info_request().outcome().await.unwrap();

        let kinds: Vec<CommandKind> = f.transmitter.commands().iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::Standby,
                CommandKind::FeedOnOff,
                CommandKind::FirmwareInfoRequest
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_publishes_event_and_cancels_stow() {
        let f = fixture();
        let mut events = f.events.subscribe();
        let (_generation, token) = f.stow.begin();

        f.dispatcher.stop(AxisSet::ALL_AXES).outcome().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), TrackingEvent::StopAllTracking);
        assert!(token.is_cancelled());
        assert_eq!(f.stow.state(), StowState::Failed(StowFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_servo_preset_cancels_stow() {
        let f = fixture();
        let (_generation, token) = f.stow.begin();
        f.dispatcher
            .servo_preset(AxisSet::TRAIN)
            .outcome()
            .await
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_position_offset_keeps_unselected_offsets() {
        let f = fixture();
        f.control.record_offsets(AxisSet::TRAIN, |_| 0.25);
        f.dispatcher
            .position_offset(
                AxisSet::AZIMUTH,
                AxisValues {
                    azimuth: 1.5,
                    elevation: 9.0,
                    train: 9.0,
                },
            )
            .outcome()
            .await
            .unwrap();

        assert_eq!(
            f.transmitter.commands()[0],
            Command::PositionOffset {
                axes: AxisSet::AZIMUTH,
                azimuth: 1.5,
                elevation: 0.0,
                train: 0.25,
            }
        );
        assert_eq!(f.control.position_offset(Axis::Elevation), 0.0);
    }

    #[tokio::test]
    async fn test_time_offset_recorded() {
        let f = fixture();
        f.dispatcher.time_offset(250.0).outcome().await.unwrap();
        assert_eq!(f.control.time_offset_ms(), 250.0);
        assert!(matches!(
            f.transmitter.commands()[0],
            Command::TimeOffset { offset_ms, .. } if offset_ms == 250.0
        ));
    }

    #[tokio::test]
    async fn test_invalid_emergency_rejected_before_queueing() {
        let f = fixture();
        assert!(matches!(
            f.dispatcher.emergency_char('x'),
            Err(CommandError::InvalidEmergencyCommand('x'))
        ));
        f.dispatcher
            .emergency_char('e')
            .unwrap()
            .outcome()
            .await
            .unwrap();
        assert_eq!(
            f.transmitter.commands(),
            vec![Command::Emergency {
                command: EmergencyCommand::Activate
            }]
        );
    }

    #[tokio::test]
    async fn test_transmit_failure_is_reported_not_raised() {
        let f = fixture();
        f.transmitter
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        // The call itself succeeds; only the handle sees the failure
        let handle = f.dispatcher.servo_alarm_reset(AxisSet::AZIMUTH);
        assert!(matches!(
            handle.outcome().await,
            Err(PedestalError::Transport(TransportError::Closed))
        ));

        // Worker keeps running after a failure
        f.transmitter
            .fail
            .store(false, std::sync::atomic::Ordering::SeqCst);
        f.dispatcher.time_sync().outcome().await.unwrap();
        assert_eq!(f.transmitter.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue() {
        let f = fixture();
        f.dispatcher.shutdown();
        tokio::task::yield_now().await;
        let result = f.dispatcher.standby(AxisSet::AZIMUTH).outcome().await;
        assert!(matches!(result, Err(PedestalError::QueueClosed)));
    }
}
