//! API types shared by the pedestal server and its clients.
//!
//! Everything here is plain serde data: error log entries and queries,
//! the status bar summary, popup snapshots and deltas, UDP link health and
//! stow sequence state. JSON field names are camelCase.

mod error_log;
mod link;

pub use error_log::{
    ErrorCategory, ErrorLogEntry, ErrorLogFilter, Page, PopupDelta, PopupSnapshot, Severity,
    StatusBarSummary, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use link::{StowFailure, StowState, UdpHealth};

/// Error returned when parsing an enum from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseVariantError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseVariantError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
