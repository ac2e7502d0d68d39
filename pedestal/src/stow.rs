//! Stow sequencer
//!
//! Parks the antenna in two stages. The train axis goes to its stow angle
//! first, and once the reported train angle settles within tolerance,
//! azimuth and elevation follow together. Only one sequence runs at a time.
//! Starting a new one, or a Stop or ServoPreset command, cancels the
//! sequence in flight and leaves the antenna wherever it was last sent.
//!
//! ```text
//! Idle -> TiltMoving -> AwaitingStabilization -> AzElMoving -> Completed
//!              \                 \                   \
//!               +-----------------+-------------------+--> Failed(reason)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use icd::{AxisMotion, AxisSet};
use pedestal_types::{StowFailure, StowState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StowConfig;
use crate::control_state::AxisValues;
use crate::dispatch::{CommandDispatcher, CommandHandle};
use crate::events::{EventPublisher, TrackingEvent};
use crate::snapshot::SnapshotProvider;

/// Whether `current` is within `tolerance` degrees of `target`.
pub fn is_stabilized(current: f32, target: f32, tolerance: f32) -> bool {
    (current - target).abs() <= tolerance
}

#[derive(Default)]
struct SlotInner {
    generation: u64,
    token: Option<CancellationToken>,
}

impl SlotInner {
    fn owns(&self, generation: u64) -> bool {
        self.generation == generation && self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

/// The single system-wide stow slot: the cancel handle of the sequence in
/// flight and the observable state.
///
/// Each sequence is tagged with a generation. State updates from a
/// sequence that has been cancelled or superseded are ignored.
pub struct StowSlot {
    inner: Mutex<SlotInner>,
    state: watch::Sender<StowState>,
}

impl StowSlot {
    pub fn new() -> Self {
        let (state, _) = watch::channel(StowState::Idle);
        Self {
            inner: Mutex::new(SlotInner::default()),
            state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> StowState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StowState> {
        self.state.subscribe()
    }

    /// Cancel whatever is running and claim the slot for a new sequence.
    pub fn begin(&self) -> (u64, CancellationToken) {
        let mut inner = self.lock();
        if let Some(previous) = inner.token.take() {
            debug!("Superseding stow sequence {}", inner.generation);
            previous.cancel();
        }
        inner.generation += 1;
        let token = CancellationToken::new();
        inner.token = Some(token.clone());
        self.state.send_replace(StowState::TiltMoving);
        (inner.generation, token)
    }

    /// Cancel the sequence in flight, if any.
    pub fn cancel_active(&self) {
        let mut inner = self.lock();
        let Some(token) = inner.token.take() else {
            return;
        };
        token.cancel();
        let cancelled = self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = StowState::Failed(StowFailure::Cancelled);
                true
            } else {
                false
            }
        });
        if cancelled {
            info!("Stow sequence cancelled");
        }
    }

    /// Move sequence `generation` to `next`. Returns false when that
    /// sequence no longer owns the slot.
    fn advance(&self, generation: u64, next: StowState) -> bool {
        let mut inner = self.lock();
        if !inner.owns(generation) {
            return false;
        }
        if next.is_terminal() {
            inner.token = None;
        }
        debug!("Stow sequence {} -> {}", generation, next);
        self.state.send_replace(next);
        true
    }

    /// Run `submit` only while sequence `generation` owns the slot. The slot
    /// stays locked throughout, so a cancel lands either before the check
    /// or after the command is queued.
    fn while_owned<T>(&self, generation: u64, submit: impl FnOnce() -> T) -> Option<T> {
        let inner = self.lock();
        if !inner.owns(generation) {
            debug!("Stow sequence {} no longer owns the slot", generation);
            return None;
        }
        Some(submit())
    }
}

impl Default for StowSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs stow sequences through the command dispatcher.
#[derive(Clone)]
pub struct StowSequencer {
    slot: Arc<StowSlot>,
    dispatcher: Arc<CommandDispatcher>,
    snapshot: Arc<dyn SnapshotProvider>,
    events: Arc<dyn EventPublisher>,
    config: StowConfig,
}

impl StowSequencer {
    pub fn new(
        slot: Arc<StowSlot>,
        dispatcher: Arc<CommandDispatcher>,
        snapshot: Arc<dyn SnapshotProvider>,
        events: Arc<dyn EventPublisher>,
        config: StowConfig,
    ) -> Self {
        Self {
            slot,
            dispatcher,
            snapshot,
            events,
            config,
        }
    }

    /// Start a new stow sequence, cancelling any sequence in flight.
    pub fn start(&self) -> JoinHandle<()> {
        let (generation, token) = self.slot.begin();
        info!("Starting stow sequence {}", generation);
        let sequencer = self.clone();
        tokio::spawn(async move { sequencer.run(generation, token).await })
    }

    pub fn cancel(&self) {
        self.slot.cancel_active();
    }

    pub fn state(&self) -> StowState {
        self.slot.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<StowState> {
        self.slot.subscribe()
    }

    async fn run(&self, generation: u64, token: CancellationToken) {
        let config = &self.config;

        let tilt = self.slot.while_owned(generation, || {
            self.events.publish(TrackingEvent::StopAllTracking);
            self.dispatcher.manual_control(
                AxisSet::TRAIN | AxisSet::STOW,
                AxisValues {
                    train: AxisMotion::new(config.train_target_deg, config.speed_deg_s),
                    ..Default::default()
                },
            )
        });
        let Some(tilt) = tilt else {
            return;
        };
        if !self.sent(generation, &token, tilt).await {
            return;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = sleep(config.settle_delay) => {}
        }
        if !self
            .slot
            .advance(generation, StowState::AwaitingStabilization)
        {
            return;
        }

        let deadline = Instant::now() + config.stabilization_timeout;
        let mut poll = interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = poll.tick() => {}
            }
            let train = self.snapshot.latest().map(|d| d.train_angle);
            if let Some(angle) = train {
                if is_stabilized(angle, config.train_target_deg, config.tolerance_deg) {
                    debug!("Train axis settled at {:.3} deg", angle);
                    break;
                }
            }
            if Instant::now() >= deadline {
                warn!(
                    "Stow sequence {} timed out after {:?} (train at {:?})",
                    generation, config.stabilization_timeout, train
                );
                self.slot
                    .advance(generation, StowState::Failed(StowFailure::Timeout));
                return;
            }
        }

        if !self.slot.advance(generation, StowState::AzElMoving) {
            return;
        }
        let az_el = self.slot.while_owned(generation, || {
            self.dispatcher.manual_control(
                AxisSet::AZIMUTH | AxisSet::ELEVATION | AxisSet::STOW,
                AxisValues {
                    azimuth: AxisMotion::new(config.azimuth_target_deg, config.speed_deg_s),
                    elevation: AxisMotion::new(config.elevation_target_deg, config.speed_deg_s),
                    ..Default::default()
                },
            )
        });
        let Some(az_el) = az_el else {
            return;
        };
        if !self.sent(generation, &token, az_el).await {
            return;
        }

        if self.slot.advance(generation, StowState::Completed) {
            info!("Stow sequence {} completed", generation);
        }
    }

    /// Wait for a stage command to go out. Returns false if the sequence
    /// was cancelled or the transmit failed.
    async fn sent(
        &self,
        generation: u64,
        token: &CancellationToken,
        handle: CommandHandle,
    ) -> bool {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            outcome = handle.outcome() => outcome,
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!("Stow sequence {} failed: {}", generation, e);
                self.slot.advance(
                    generation,
                    StowState::Failed(StowFailure::Transmit(e.to_string())),
                );
                false
            }
        }
    }
}
