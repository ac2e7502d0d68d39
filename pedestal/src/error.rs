use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from the UDP channel.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to resolve address '{address}': {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Address '{0}' did not resolve to any socket address")]
    NoAddress(String),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel is closed")]
    Closed,

    #[error("Short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors building the typed configuration from settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for setting {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error for the pedestal service.
#[derive(Error, Debug)]
pub enum PedestalError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] icd::CommandError),

    #[error(transparent)]
    Frame(#[from] icd::FrameError),

    #[error("Prometheus metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Error popup for client '{0}' is not open")]
    PopupNotOpen(String),

    #[error("Command queue is shut down")]
    QueueClosed,

    #[error("Command task panicked: {0}")]
    Panicked(String),
}

pub type PedestalResult<T> = Result<T, PedestalError>;

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
