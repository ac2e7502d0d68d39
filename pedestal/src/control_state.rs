//! Shared command-side state
//!
//! Holds what the server last asked the pedestal to do: commanded angles,
//! tracking position offsets and the clock offset applied to every UTC
//! field the server builds. Written by command dispatch, read by the poll
//! loop and the HTTP status endpoints.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeDelta, Utc};
use icd::{Axis, AxisSet, IcdTime};
use serde::Serialize;

/// One value per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AxisValues<T> {
    pub azimuth: T,
    pub elevation: T,
    pub train: T,
}

impl<T: Copy> AxisValues<T> {
    pub fn get(&self, axis: Axis) -> T {
        match axis {
            Axis::Azimuth => self.azimuth,
            Axis::Elevation => self.elevation,
            Axis::Train => self.train,
        }
    }

    pub fn set(&mut self, axis: Axis, value: T) {
        match axis {
            Axis::Azimuth => self.azimuth = value,
            Axis::Elevation => self.elevation = value,
            Axis::Train => self.train = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSnapshot {
    /// `None` until an axis has been commanded
    pub commanded_angles: AxisValues<Option<f32>>,
    pub position_offsets: AxisValues<f32>,
    pub time_offset_ms: f32,
}

/// Thread-safe handle over [`ControlSnapshot`].
#[derive(Debug, Default)]
pub struct ControlState {
    inner: RwLock<ControlSnapshot>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ControlSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ControlSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        *self.read()
    }

    /// Record commanded angles for the axes selected in `axes` only.
    pub fn record_commanded<F>(&self, axes: AxisSet, angle: F)
    where
        F: Fn(Axis) -> f32,
    {
        let mut state = self.write();
        for axis in axes.axes() {
            state.commanded_angles.set(axis, Some(angle(axis)));
        }
    }

    pub fn commanded_angle(&self, axis: Axis) -> Option<f32> {
        self.read().commanded_angles.get(axis)
    }

    /// Record position offsets for the axes selected in `axes` only.
    pub fn record_offsets<F>(&self, axes: AxisSet, offset: F)
    where
        F: Fn(Axis) -> f32,
    {
        let mut state = self.write();
        for axis in axes.axes() {
            state.position_offsets.set(axis, offset(axis));
        }
    }

    pub fn position_offset(&self, axis: Axis) -> f32 {
        self.read().position_offsets.get(axis)
    }

    pub fn set_time_offset_ms(&self, offset_ms: f32) {
        self.write().time_offset_ms = offset_ms;
    }

    pub fn time_offset_ms(&self) -> f32 {
        self.read().time_offset_ms
    }

    /// Current UTC with the clock offset applied.
    pub fn adjusted_now(&self) -> DateTime<Utc> {
        let offset = TimeDelta::milliseconds(self.time_offset_ms().round() as i64);
        Utc::now() + offset
    }

    /// UTC wire fields with the clock offset applied.
    pub fn utc_now(&self) -> IcdTime {
        IcdTime::from_datetime(&self.adjusted_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commanded_angles_only_for_selected_axes() {
        let state = ControlState::new();
        state.record_commanded(AxisSet::AZIMUTH | AxisSet::STOW, |axis| match axis {
            Axis::Azimuth => 12.5,
            _ => 99.0,
        });
        assert_eq!(state.commanded_angle(Axis::Azimuth), Some(12.5));
        assert_eq!(state.commanded_angle(Axis::Elevation), None);
        assert_eq!(state.commanded_angle(Axis::Train), None);
    }

    #[test]
    fn test_offsets_only_for_selected_axes() {
        let state = ControlState::new();
        state.record_offsets(AxisSet::ALL_AXES, |_| 1.0);
        state.record_offsets(AxisSet::ELEVATION, |_| -0.5);
        assert_eq!(state.position_offset(Axis::Azimuth), 1.0);
        assert_eq!(state.position_offset(Axis::Elevation), -0.5);
        assert_eq!(state.position_offset(Axis::Train), 1.0);
    }

    #[test]
    fn test_time_offset_applied() {
        let state = ControlState::new();
        let before = Utc::now();
        state.set_time_offset_ms(60_000.0);
        let adjusted = state.adjusted_now();
        assert!(adjusted - before >= TimeDelta::seconds(59));
        assert!(adjusted - before <= TimeDelta::seconds(61));
    }
}
