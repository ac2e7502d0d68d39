//! Status bit-diff engine
//!
//! Turns edges on the 14 status registers into error log drafts. Each
//! decoded [`ReadData`] is compared register by register against the last
//! value seen. A mapped bit rising produces an entry at the mapped
//! severity, and falling produces an INFO resolution. Levels alone never
//! produce entries. The stored value is overwritten on every observation
//! whether or not anything fired.
//!
//! Registers start from an all-zero baseline, so a fault already present
//! in the first frame is reported once.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use icd::{ReadData, StatusRegister, StatusRegisters};
use pedestal_types::Severity;
use strum::{EnumCount, IntoEnumIterator};

use crate::error_log::EntryDraft;
use crate::error_map::{self, BitMapping};

/// Last observed value of every register.
#[derive(Debug, Default)]
pub struct BitRegisterState {
    registers: [AtomicU8; StatusRegister::COUNT],
}

impl BitRegisterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and return the previous value in one atomic step.
    pub fn swap(&self, register: StatusRegister, value: u8) -> u8 {
        self.registers[register.index()].swap(value, Ordering::AcqRel)
    }

    pub fn get(&self, register: StatusRegister) -> u8 {
        self.registers[register.index()].load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatusRegisters {
        let mut out = StatusRegisters::default();
        for register in StatusRegister::iter() {
            out.set(register, self.get(register));
        }
        out
    }
}

/// A single bit edge on one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitEdge {
    pub register: StatusRegister,
    pub bit: u8,
    pub rising: bool,
}

/// Every bit that differs between `previous` and `current`, LSB first.
pub fn edges(register: StatusRegister, previous: u8, current: u8) -> impl Iterator<Item = BitEdge> {
    let changed = previous ^ current;
    (0..8u8)
        .filter(move |bit| changed & (1 << bit) != 0)
        .map(move |bit| BitEdge {
            register,
            bit,
            rising: current & (1 << bit) != 0,
        })
}

fn draft(mapping: &BitMapping, rising: bool, now: DateTime<Utc>) -> EntryDraft {
    EntryDraft {
        timestamp: now,
        category: mapping.category,
        severity: if rising {
            mapping.severity
        } else {
            Severity::Info
        },
        error_key: mapping.error_key.to_string(),
        component: mapping.component.to_string(),
        is_resolved: !rising,
        resolved_at: (!rising).then_some(now),
    }
}

#[derive(Debug, Default)]
pub struct StatusDiffEngine {
    state: BitRegisterState,
}

impl StatusDiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &BitRegisterState {
        &self.state
    }

    /// Diff one snapshot against the stored registers and update them.
    pub fn apply(&self, data: &ReadData, now: DateTime<Utc>) -> Vec<EntryDraft> {
        let mut drafts = Vec::new();
        for (register, value) in data.registers.iter() {
            let previous = self.state.swap(register, value);
            for edge in edges(register, previous, value) {
                if let Some(mapping) = error_map::lookup(register, edge.bit) {
                    drafts.push(draft(mapping, edge.rising, now));
                }
            }
        }
        drafts
    }
}
