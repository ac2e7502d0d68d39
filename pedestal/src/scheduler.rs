//! Fixed-rate tick loops
//!
//! Each loop runs one synchronous tick per period on its own tokio task.
//! Missed ticks are skipped rather than bunched. A tick that returns an error
//! or panics is logged and counted, and the loop carries on at the next
//! period boundary. Ticks slower than the warning threshold are logged.
//!
//! [`Scheduler`] starts the receive and send loops together and stops them
//! together.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{panic_message, PedestalResult};
use crate::metrics::{LinkMetrics, RECEIVE_LOOP, SEND_LOOP};

/// Period and slow-tick threshold for one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub period: Duration,
    pub warn_threshold: Duration,
}

/// Spawn a loop running `tick` every `timing.period` until `cancel` fires.
pub fn spawn_fixed_rate<F>(
    name: &'static str,
    timing: LoopTiming,
    cancel: CancellationToken,
    metrics: Arc<LinkMetrics>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> PedestalResult<()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(timing.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            match catch_unwind(AssertUnwindSafe(&mut tick)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    metrics.tick_failure(name);
                    warn!("{} tick failed: {}", name, e);
                }
                Err(payload) => {
                    metrics.tick_failure(name);
                    error!("{} tick panicked: {}", name, panic_message(payload.as_ref()));
                }
            }

            let elapsed = started.elapsed();
            if elapsed > timing.warn_threshold {
                metrics.slow_tick(name);
                warn!(
                    "{} tick took {:?} (threshold {:?})",
                    name, elapsed, timing.warn_threshold
                );
            }
        }
        info!("{} loop stopped", name);
    })
}

/// The receive and send loops, managed as one unit.
pub struct Scheduler {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start both loops.
    pub fn start<R, S>(
        receive: LoopTiming,
        send: LoopTiming,
        metrics: Arc<LinkMetrics>,
        receive_tick: R,
        send_tick: S,
    ) -> Self
    where
        R: FnMut() -> PedestalResult<()> + Send + 'static,
        S: FnMut() -> PedestalResult<()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let tasks = vec![
            spawn_fixed_rate(
                RECEIVE_LOOP,
                receive,
                cancel.clone(),
                metrics.clone(),
                receive_tick,
            ),
            spawn_fixed_rate(SEND_LOOP, send, cancel.clone(), metrics, send_tick),
        ];
        info!(
            "Scheduler started (receive every {:?}, send every {:?})",
            receive.period, send.period
        );
        Self { cancel, tasks }
    }

    /// True while neither loop has been stopped or exited.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().all(|t| !t.is_finished())
    }

    /// Signal both loops to stop and wait until they have.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Scheduler loop terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
