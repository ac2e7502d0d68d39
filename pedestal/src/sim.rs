//! Firmware simulator
//!
//! Answers ICD commands the way the pedestal firmware does, closely enough
//! to exercise the server end to end. It replies to ReadStatus with a
//! status frame and to FirmwareInfoRequest with version info, and slews
//! each axis toward its manual-control target at the commanded speed.
//! Status bits can be injected to raise faults.
//!
//! [`SimChannel`] runs it in-process behind the [`Channel`] trait, and
//! [`serve_udp`] puts it behind a real socket for the `mock_firmware`
//! binary.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use icd::{
    Axis, AxisMotion, AxisSet, Command, EmergencyCommand, FeedSet, FirmwareInfo, FirmwareVersion,
    FrameError, IcdTime, ReadData, StatusRegister, StatusRegisters,
};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control_state::AxisValues;
use crate::error::TransportError;
use crate::transport::{Channel, ChannelFactory};

pub type SharedSimulator = Arc<Mutex<FirmwareSimulator>>;

fn servo_register(axis: Axis) -> StatusRegister {
    match axis {
        Axis::Azimuth => StatusRegister::AzimuthBoardServo,
        Axis::Elevation => StatusRegister::ElevationBoardServo,
        Axis::Train => StatusRegister::TrainBoardServo,
    }
}

fn set_axis(data: &mut ReadData, axis: Axis, angle: f32, speed: f32) {
    match axis {
        Axis::Azimuth => {
            data.azimuth_angle = angle;
            data.azimuth_speed = speed;
        }
        Axis::Elevation => {
            data.elevation_angle = angle;
            data.elevation_speed = speed;
        }
        Axis::Train => {
            data.train_angle = angle;
            data.train_speed = speed;
        }
    }
}

pub struct FirmwareSimulator {
    status: ReadData,
    targets: AxisValues<Option<AxisMotion>>,
    faults: StatusRegisters,
    emergency: bool,
    last_frame_bad_crc: bool,
    feeds: FeedSet,
    firmware: FirmwareInfo,
    commands_handled: u64,
    frames_rejected: u64,
}

impl FirmwareSimulator {
    pub fn new() -> Self {
        let version = |major, minor| FirmwareVersion { major, minor };
        Self {
            status: ReadData {
                wind_speed: 3.5,
                wind_direction: 270.0,
                rtd1_temperature: 21.0,
                rtd2_temperature: 22.5,
                ..Default::default()
            },
            targets: AxisValues::default(),
            faults: StatusRegisters::default(),
            emergency: false,
            last_frame_bad_crc: false,
            feeds: FeedSet::empty(),
            firmware: FirmwareInfo {
                main: version(2, 4),
                azimuth: version(1, 7),
                elevation: version(1, 7),
                train: version(1, 3),
                feed: version(3, 0),
            },
            commands_handled: 0,
            frames_rejected: 0,
        }
    }

    pub fn shared() -> SharedSimulator {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn angle(&self, axis: Axis) -> f32 {
        self.status.angle(axis)
    }

    /// Teleport an axis, cancelling any motion on it.
    pub fn set_angle(&mut self, axis: Axis, angle: f32) {
        self.targets.set(axis, None);
        set_axis(&mut self.status, axis, angle, 0.0);
    }

    pub fn inject_fault(&mut self, register: StatusRegister, bit: u8, on: bool) {
        self.faults.set_bit(register, bit, on);
    }

    pub fn clear_faults(&mut self) {
        self.faults = StatusRegisters::default();
    }

    pub fn firmware_info(&self) -> FirmwareInfo {
        self.firmware
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn feeds(&self) -> FeedSet {
        self.feeds
    }

    pub fn commands_handled(&self) -> u64 {
        self.commands_handled
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Register values as they would be reported now.
    pub fn registers(&self) -> StatusRegisters {
        let mut registers = self.faults;
        if self.emergency {
            registers.set_bit(StatusRegister::MainBoardStatus, 0, true);
        }
        if self.last_frame_bad_crc {
            registers.set_bit(StatusRegister::MainBoardProtocol, 0, true);
        }
        registers
    }

    pub fn status(&self) -> ReadData {
        ReadData {
            time: IcdTime::now(),
            registers: self.registers(),
            ..self.status.clone()
        }
    }

    /// Advance axis motion by `dt`.
    pub fn step(&mut self, dt: Duration) {
        let seconds = dt.as_secs_f32();
        for axis in [Axis::Azimuth, Axis::Elevation, Axis::Train] {
            let Some(motion) = self.targets.get(axis) else {
                continue;
            };
            let current = self.status.angle(axis);
            let remaining = motion.angle - current;
            let reach = motion.speed.abs() * seconds;
            if motion.speed == 0.0 || remaining.abs() <= reach {
                let angle = if motion.speed == 0.0 { current } else { motion.angle };
                set_axis(&mut self.status, axis, angle, 0.0);
                self.targets.set(axis, None);
            } else {
                let signed = motion.speed.abs() * remaining.signum();
                set_axis(&mut self.status, axis, current + reach * remaining.signum(), signed);
            }
        }
    }

    fn halt(&mut self, axes: AxisSet) {
        for axis in axes.axes() {
            let angle = self.status.angle(axis);
            self.set_angle(axis, angle);
        }
    }

    /// Handle one inbound frame, returning the reply if the command has one.
    pub fn handle(&mut self, frame: &[u8]) -> Option<Bytes> {
        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(e) => {
                self.frames_rejected += 1;
                self.last_frame_bad_crc = matches!(e, FrameError::Checksum { .. });
                debug!("Simulator rejected frame: {}", e);
                return None;
            }
        };
        self.last_frame_bad_crc = false;
        self.commands_handled += 1;

        match command {
            Command::ReadStatus { .. } => return Some(self.status().encode()),
            Command::FirmwareInfoRequest => return Some(self.firmware.encode()),
            Command::ManualControl {
                axes,
                azimuth,
                elevation,
                train,
            } => {
                if self.emergency {
                    debug!("Simulator ignoring manual control during emergency stop");
                    return None;
                }
                let motions = AxisValues {
                    azimuth,
                    elevation,
                    train,
                };
                for axis in axes.axes() {
                    self.targets.set(axis, Some(motions.get(axis)));
                }
            }
            Command::Stop { axes } | Command::Standby { axes } | Command::ServoPreset { axes } => {
                self.halt(axes);
            }
            Command::Emergency { command } => {
                self.emergency = command == EmergencyCommand::Activate;
                if self.emergency {
                    self.halt(AxisSet::ALL_AXES);
                }
                info!(
                    "Simulator emergency stop {}",
                    if self.emergency { "active" } else { "released" }
                );
            }
            Command::ServoAlarmReset { axes } => {
                for axis in axes.axes() {
                    self.faults.set(servo_register(axis), 0);
                }
            }
            Command::FeedOnOff { feeds } => self.feeds = feeds,
            Command::PositionOffset { .. }
            | Command::TimeOffset { .. }
            | Command::TimeSync { .. } => {}
        }
        None
    }
}

impl Default for FirmwareSimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(sim: &SharedSimulator) -> MutexGuard<'_, FirmwareSimulator> {
    sim.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-process channel to a simulator. Replies are queued on send.
pub struct SimChannel {
    sim: SharedSimulator,
    inbox: Mutex<VecDeque<Vec<u8>>>,
    open: AtomicBool,
    last_step: Mutex<Instant>,
}

impl SimChannel {
    pub fn new(sim: SharedSimulator) -> Self {
        Self {
            sim,
            inbox: Mutex::new(VecDeque::new()),
            open: AtomicBool::new(true),
            last_step: Mutex::new(Instant::now()),
        }
    }

    fn elapsed_step(&self) -> Duration {
        let now = Instant::now();
        let mut last = self.last_step.lock().unwrap_or_else(|e| e.into_inner());
        let dt = now - *last;
        *last = now;
        dt
    }
}

impl Channel for SimChannel {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let dt = self.elapsed_step();
        let reply = {
            let mut sim = lock(&self.sim);
            sim.step(dt);
            sim.handle(bytes)
        };
        if let Some(reply) = reply {
            self.inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(reply.to_vec());
        }
        Ok(())
    }

    fn try_receive(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        Ok(self
            .inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Opens [`SimChannel`]s, optionally failing the first few attempts.
pub struct SimChannelFactory {
    sim: SharedSimulator,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl SimChannelFactory {
    pub fn new(sim: SharedSimulator) -> Self {
        Self {
            sim,
            failures_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` open attempts.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ChannelFactory for SimChannelFactory {
    fn open(&self) -> Result<Arc<dyn Channel>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::AddrInUse,
                "simulated bind failure",
            )));
        }
        Ok(Arc::new(SimChannel::new(self.sim.clone())))
    }

    fn local_address(&self) -> String {
        "sim".to_string()
    }

    fn firmware_address(&self) -> String {
        "sim".to_string()
    }
}

/// Serve the simulator on `socket` until `cancel` fires. Replies go back
/// to whichever address sent the command.
pub async fn serve_udp(socket: UdpSocket, sim: SharedSimulator, cancel: CancellationToken) {
    let mut buf = vec![0u8; 2048];
    let mut last_step = Instant::now();
    match socket.local_addr() {
        Ok(addr) => info!("Mock firmware listening on {}", addr),
        Err(e) => warn!("Mock firmware socket has no local address: {}", e),
    }

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => {
                warn!("Mock firmware receive failed: {}", e);
                continue;
            }
        };

        let now = Instant::now();
        let reply = {
            let mut sim = lock(&sim);
            sim.step(now - last_step);
            sim.handle(&buf[..len])
        };
        last_step = now;

        if let Some(reply) = reply {
            if let Err(e) = socket.send_to(&reply, from).await {
                warn!("Mock firmware reply to {} failed: {}", from, e);
            }
        }
    }
    info!("Mock firmware stopped");
}
