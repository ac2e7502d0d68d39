//! Error log store and delivery
//!
//! A bounded FIFO of [`ErrorLogEntry`] values. Once full, each insert
//! evicts the oldest entry. Ids are assigned on insert and only ever grow,
//! so a client's cursor is simply the newest id it has seen.
//!
//! Popup delivery: opening a popup returns everything retained plus the
//! status bar and records the cursor. Each delta call returns the entries
//! with an id past the cursor and moves the cursor forward. Clients that
//! fall more than one capacity behind silently miss the evicted entries.
//!
//! Locks are never held across both the popup table and the log at once
//! except in that order (popups, then log).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use pedestal_types::{
    ErrorCategory, ErrorLogEntry, ErrorLogFilter, Page, PopupDelta, PopupSnapshot, Severity,
    StatusBarSummary,
};
use tracing::{debug, info};

use crate::config::ErrorLogConfig;
use crate::error::{PedestalError, PedestalResult};

/// An entry before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub error_key: String,
    pub component: String,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl EntryDraft {
    fn into_entry(self, id: u64) -> ErrorLogEntry {
        ErrorLogEntry {
            id,
            timestamp: self.timestamp,
            category: self.category,
            severity: self.severity,
            error_key: self.error_key,
            component: self.component,
            is_resolved: self.is_resolved,
            resolved_at: self.resolved_at,
        }
    }
}

struct LogInner {
    entries: VecDeque<ErrorLogEntry>,
    next_id: u64,
}

#[derive(Debug, Clone)]
struct PopupState {
    last_log_id: Option<u64>,
    last_update: DateTime<Utc>,
}

pub struct ErrorLogStore {
    log: Mutex<LogInner>,
    popups: Mutex<HashMap<String, PopupState>>,
    capacity: usize,
    resolved_display_window: TimeDelta,
}

impl ErrorLogStore {
    pub fn new(config: &ErrorLogConfig) -> Self {
        let window = TimeDelta::from_std(config.resolved_display_window)
            .unwrap_or_else(|_| TimeDelta::seconds(30));
        Self::with_capacity(config.capacity, window)
    }

    pub fn with_capacity(capacity: usize, resolved_display_window: TimeDelta) -> Self {
        let capacity = capacity.max(1);
        Self {
            log: Mutex::new(LogInner {
                entries: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
            popups: Mutex::new(HashMap::new()),
            capacity,
            resolved_display_window,
        }
    }

    fn log(&self) -> MutexGuard<'_, LogInner> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn popups(&self) -> MutexGuard<'_, HashMap<String, PopupState>> {
        self.popups.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.log().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().entries.is_empty()
    }

    pub fn record(&self, draft: EntryDraft) -> ErrorLogEntry {
        let mut log = self.log();
        self.insert(&mut log, draft)
    }

    /// Insert drafts in order under one lock, returning the stored entries.
    pub fn record_batch(&self, drafts: Vec<EntryDraft>) -> Vec<ErrorLogEntry> {
        if drafts.is_empty() {
            return Vec::new();
        }
        let mut log = self.log();
        drafts
            .into_iter()
            .map(|draft| self.insert(&mut log, draft))
            .collect()
    }

    fn insert(&self, log: &mut LogInner, draft: EntryDraft) -> ErrorLogEntry {
        let entry = draft.into_entry(log.next_id);
        log.next_id += 1;
        if log.entries.len() >= self.capacity {
            log.entries.pop_front();
        }
        debug!(
            "Error log #{}: {} {} {} resolved={}",
            entry.id, entry.severity, entry.component, entry.error_key, entry.is_resolved
        );
        log.entries.push_back(entry.clone());
        entry
    }

    /// Every retained entry, oldest first.
    pub fn all(&self) -> Vec<ErrorLogEntry> {
        self.log().entries.iter().cloned().collect()
    }

    /// Entries whose `(error_key, component)` has not been resolved since,
    /// oldest first.
    pub fn active(&self) -> Vec<ErrorLogEntry> {
        active_entries(&self.log().entries)
    }

    /// Filtered, newest-first, paginated query.
    pub fn search(&self, filter: &ErrorLogFilter) -> Page<ErrorLogEntry> {
        let matching: Vec<ErrorLogEntry> = self
            .log()
            .entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Page::paginate(matching, filter.page, filter.page_size())
    }

    pub fn status_bar(&self, now: DateTime<Utc>) -> StatusBarSummary {
        let log = self.log();
        self.summarize(&log.entries, now)
    }

    fn summarize(&self, entries: &VecDeque<ErrorLogEntry>, now: DateTime<Utc>) -> StatusBarSummary {
        let active = active_entries(entries);
        let count = |severity: Severity| active.iter().filter(|e| e.severity == severity).count();

        let latest = match entries.back() {
            Some(newest) if !newest.is_resolved => Some(newest.clone()),
            Some(newest)
                if newest
                    .resolved_at
                    .is_some_and(|at| now - at <= self.resolved_display_window) =>
            {
                Some(newest.clone())
            }
            _ => active.last().cloned(),
        };

        StatusBarSummary {
            has_active_errors: !active.is_empty(),
            active_error_count: active.len(),
            critical_count: count(Severity::Critical),
            error_count: count(Severity::Error),
            warning_count: count(Severity::Warning),
            latest,
        }
    }

    /// Open (or reopen) `client`'s popup and return the full snapshot.
    pub fn open_popup(&self, client: &str, now: DateTime<Utc>) -> PopupSnapshot {
        let mut popups = self.popups();
        let log = self.log();
        let entries: Vec<ErrorLogEntry> = log.entries.iter().cloned().collect();
        let last_log_id = entries.last().map(|e| e.id);
        let status_bar = self.summarize(&log.entries, now);
        drop(log);

        popups.insert(
            client.to_string(),
            PopupState {
                last_log_id,
                last_update: now,
            },
        );
        info!("Error popup opened for {} at cursor {:?}", client, last_log_id);
        PopupSnapshot {
            entries,
            status_bar,
            last_log_id,
        }
    }

    /// Entries after `client`'s cursor, advancing the cursor past them.
    pub fn popup_delta(&self, client: &str, now: DateTime<Utc>) -> PedestalResult<PopupDelta> {
        let mut popups = self.popups();
        let popup = popups
            .get_mut(client)
            .ok_or_else(|| PedestalError::PopupNotOpen(client.to_string()))?;

        let log = self.log();
        let entries: Vec<ErrorLogEntry> = log
            .entries
            .iter()
            .filter(|e| popup.last_log_id.is_none_or(|cursor| e.id > cursor))
            .cloned()
            .collect();
        let status_bar = self.summarize(&log.entries, now);
        drop(log);

        if let Some(newest) = entries.last() {
            popup.last_log_id = Some(newest.id);
        }
        popup.last_update = now;
        Ok(PopupDelta {
            entries,
            status_bar,
            last_log_id: popup.last_log_id,
        })
    }

    /// Close `client`'s popup. Returns false if it was not open.
    pub fn close_popup(&self, client: &str) -> bool {
        let closed = self.popups().remove(client).is_some();
        if closed {
            info!("Error popup closed for {}", client);
        }
        closed
    }

    pub fn is_popup_open(&self, client: &str) -> bool {
        self.popups().contains_key(client)
    }

    /// Last delivery time for `client`, if its popup is open.
    pub fn popup_last_update(&self, client: &str) -> Option<DateTime<Utc>> {
        self.popups().get(client).map(|p| p.last_update)
    }
}

/// Entries newer than any resolution of the same `(error_key, component)`.
fn active_entries(entries: &VecDeque<ErrorLogEntry>) -> Vec<ErrorLogEntry> {
    let mut settled: HashSet<(&str, &str)> = HashSet::new();
    let mut active = Vec::new();
    for entry in entries.iter().rev() {
        let key = (entry.error_key.as_str(), entry.component.as_str());
        if settled.insert(key) && !entry.is_resolved {
            active.push(entry.clone());
        }
    }
    active.reverse();
    active
}
