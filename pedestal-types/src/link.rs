//! UDP link and motion sequence status types.

use serde::{Deserialize, Serialize};

/// Health and counters of the UDP link, from `/api/udp/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpHealth {
    /// Both scheduler loops are running
    pub running: bool,
    /// Running and a status frame arrived within the health timeout
    pub healthy: bool,
    /// A socket is bound
    pub connected: bool,
    pub local_address: String,
    pub firmware_address: String,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub status_frames: u64,
    pub send_errors: u64,
    pub decode_errors: u64,
    /// Datagrams from an address other than the firmware
    pub rejected_datagrams: u64,
    /// Scheduler ticks that failed or panicked
    pub tick_failures: u64,
    pub slow_ticks: u64,
    /// Milliseconds since the last decoded status frame
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_status_age_ms: Option<u64>,
}

/// Why a stow sequence ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
pub enum StowFailure {
    /// Train axis did not settle within the stabilization timeout
    #[error("train axis did not stabilize before the timeout")]
    Timeout,
    /// Superseded by Stop, ServoPreset or shutdown
    #[error("stow sequence cancelled")]
    Cancelled,
    #[error("failed to transmit stow command: {0}")]
    Transmit(String),
}

/// Progress of the stow (parking) sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum StowState {
    #[default]
    Idle,
    /// Train axis is moving to its stow angle
    TiltMoving,
    /// Polling the train angle until it settles
    AwaitingStabilization,
    /// Azimuth and elevation are moving to their stow angles
    AzElMoving,
    Completed,
    Failed(StowFailure),
}

impl StowState {
    /// Whether a sequence is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StowState::TiltMoving | StowState::AwaitingStabilization | StowState::AzElMoving
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StowState::Completed | StowState::Failed(_))
    }
}

impl std::fmt::Display for StowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StowState::Idle => write!(f, "idle"),
            StowState::TiltMoving => write!(f, "tilt moving"),
            StowState::AwaitingStabilization => write!(f, "awaiting stabilization"),
            StowState::AzElMoving => write!(f, "az/el moving"),
            StowState::Completed => write!(f, "completed"),
            StowState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
