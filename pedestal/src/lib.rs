//! Antenna pedestal control service
//!
//! Talks to the pedestal firmware over the ICD UDP protocol (see the
//! [`icd`] crate) and exposes the result over HTTP.
//!
//! # Runtime model
//!
//! - [`link::PedestalLink`] opens the channel and runs two fixed-rate
//!   loops: receive every 10 ms, ReadStatus poll every 30 ms
//! - every status frame is published to [`snapshot::SnapshotCell`] and
//!   diffed by [`status_diff::StatusDiffEngine`] into the
//!   [`error_log::ErrorLogStore`]
//! - [`dispatch::CommandDispatcher`] queues operator commands onto a
//!   single worker so nothing blocks the loops
//! - [`stow::StowSequencer`] drives the two-phase stow maneuver through the
//!   dispatcher
//!
//! [`service::Pedestal`] wires all of it together.
//!
//! # Example
//!
//! ```no_run
//! use pedestal::{Pedestal, PedestalConfig};
//!
//! # async fn run() -> pedestal::PedestalResult<()> {
//! let pedestal = Pedestal::udp(PedestalConfig::default())?;
//! pedestal.start();
//! // ...
//! pedestal.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod control_state;
pub mod dispatch;
pub mod error;
pub mod error_log;
pub mod error_map;
pub mod events;
pub mod link;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod sim;
pub mod snapshot;
pub mod status_diff;
pub mod stow;
pub mod transport;

pub use config::{ApiConfig, ErrorLogConfig, LinkConfig, PedestalConfig, StowConfig};
pub use control_state::{AxisValues, ControlSnapshot, ControlState};
pub use dispatch::{CommandDispatcher, CommandHandle, Transmitter};
pub use error::{ConfigError, PedestalError, PedestalResult, TransportError};
pub use error_log::{EntryDraft, ErrorLogStore};
pub use events::{EventBus, EventPublisher, TrackingEvent};
pub use link::{PedestalLink, ReceivePipeline};
pub use metrics::LinkMetrics;
pub use service::Pedestal;
pub use settings::{EnvSettings, JsonFileSettings, LayeredSettings, MapSettings, SettingsProvider};
pub use sim::{FirmwareSimulator, SharedSimulator, SimChannel, SimChannelFactory};
pub use snapshot::{FirmwareCell, SnapshotCell, SnapshotProvider};
pub use status_diff::StatusDiffEngine;
pub use stow::{StowSequencer, StowSlot};
pub use transport::{Channel, ChannelFactory, UdpChannel, UdpChannelFactory};
