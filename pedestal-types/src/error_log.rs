//! Error log types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseVariantError;

/// Default page size for error log queries.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Largest page size a query may request.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Severity of an error log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Numeric severity rank (higher = more severe).
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
            Severity::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(ParseVariantError::new("severity", s)),
        }
    }
}

/// Subsystem an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
    /// Link and framing faults reported by firmware
    Protocol,
    /// Board health (watchdog, temperature, emergency)
    System,
    /// Motor power stages
    Power,
    /// Servo drive alarms
    Servo,
    /// Software and hardware travel limits
    Limit,
    /// RF feed boards
    Feed,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Protocol => "PROTOCOL",
            ErrorCategory::System => "SYSTEM",
            ErrorCategory::Power => "POWER",
            ErrorCategory::Servo => "SERVO",
            ErrorCategory::Limit => "LIMIT",
            ErrorCategory::Feed => "FEED",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PROTOCOL" => Ok(ErrorCategory::Protocol),
            "SYSTEM" => Ok(ErrorCategory::System),
            "POWER" => Ok(ErrorCategory::Power),
            "SERVO" => Ok(ErrorCategory::Servo),
            "LIMIT" => Ok(ErrorCategory::Limit),
            "FEED" => Ok(ErrorCategory::Feed),
            _ => Err(ParseVariantError::new("category", s)),
        }
    }
}

/// One error or resolution event.
///
/// Entries are never edited. A resolution is a new entry with
/// `is_resolved = true` and severity [`Severity::Info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    /// Monotonic id, usable as a delivery cursor
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Stable identifier of the condition, e.g. `AZIMUTH_SERVO_OVERCURRENT`
    pub error_key: String,
    /// Board or subsystem that raised it
    pub component: String,
    pub is_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Query parameters for the paginated error log search.
///
/// All filters are optional; `start` and `end` are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorLogFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub category: Option<ErrorCategory>,
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    pub page: usize,
    pub size: usize,
}

impl Default for ErrorLogFilter {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            category: None,
            severity: None,
            resolved: None,
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ErrorLogFilter {
    /// Check whether an entry passes every filter set.
    pub fn matches(&self, entry: &ErrorLogEntry) -> bool {
        self.start.is_none_or(|start| entry.timestamp >= start)
            && self.end.is_none_or(|end| entry.timestamp <= end)
            && self.category.is_none_or(|c| entry.category == c)
            && self.severity.is_none_or(|s| entry.severity == s)
            && self.resolved.is_none_or(|r| entry.is_resolved == r)
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn page_size(&self) -> usize {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// One page of a paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: usize,
    pub total_pages: usize,
    /// Zero-based page number
    pub number: usize,
    pub size: usize,
    pub number_of_elements: usize,
    pub first: bool,
    pub last: bool,
}

impl<T> Page<T> {
    /// Cut page `number` of `size` items out of an already sorted list.
    pub fn paginate(items: Vec<T>, number: usize, size: usize) -> Self {
        let size = size.max(1);
        let total_elements = items.len();
        let total_pages = total_elements.div_ceil(size);
        let content: Vec<T> = items
            .into_iter()
            .skip(number.saturating_mul(size))
            .take(size)
            .collect();
        Self {
            number_of_elements: content.len(),
            content,
            total_elements,
            total_pages,
            number,
            size,
            first: number == 0,
            last: number.saturating_add(1) >= total_pages,
        }
    }
}

/// Summary shown in the operator status bar.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBarSummary {
    pub has_active_errors: bool,
    pub active_error_count: usize,
    pub critical_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
    /// Most relevant recent entry, if any
    pub latest: Option<ErrorLogEntry>,
}

/// Sent when a client opens its error popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupSnapshot {
    pub entries: Vec<ErrorLogEntry>,
    pub status_bar: StatusBarSummary,
    /// Cursor recorded for this client
    pub last_log_id: Option<u64>,
}

/// Entries that arrived since a client's cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupDelta {
    pub entries: Vec<ErrorLogEntry>,
    pub status_bar: StatusBarSummary,
    pub last_log_id: Option<u64>,
}

impl PopupDelta {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
