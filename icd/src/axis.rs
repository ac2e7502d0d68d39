//! Axis and feed selector sets
//!
//! The wire format packs axis selection into a single byte. The domain API
//! only exposes the closed set of flags below, never raw bit indices.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// A rotational axis of the pedestal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Azimuth,
    Elevation,
    /// Third rotational axis, sometimes called Tilt
    Train,
}

impl Axis {
    /// The selector flag for this axis.
    pub fn flag(self) -> AxisSet {
        match self {
            Axis::Azimuth => AxisSet::AZIMUTH,
            Axis::Elevation => AxisSet::ELEVATION,
            Axis::Train => AxisSet::TRAIN,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::Azimuth => "azimuth",
            Axis::Elevation => "elevation",
            Axis::Train => "train",
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Axis selector byte.
    ///
    /// | bit | flag |
    /// |-----|------|
    /// | 0 | Azimuth |
    /// | 1 | Elevation |
    /// | 2 | Train |
    /// | 3 | STOW (motion is part of the parking maneuver) |
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AxisSet: u8 {
        const AZIMUTH = 0b0000_0001;
        const ELEVATION = 0b0000_0010;
        const TRAIN = 0b0000_0100;
        const STOW = 0b0000_1000;
    }
}

impl AxisSet {
    /// Azimuth, Elevation and Train without the STOW flag.
    pub const ALL_AXES: AxisSet = AxisSet::AZIMUTH
        .union(AxisSet::ELEVATION)
        .union(AxisSet::TRAIN);

    /// Build a selector from a list of axes.
    pub fn from_axes<I: IntoIterator<Item = Axis>>(axes: I) -> Self {
        axes.into_iter()
            .fold(AxisSet::empty(), |set, axis| set | axis.flag())
    }

    /// Check whether an axis is selected.
    pub fn selects(&self, axis: Axis) -> bool {
        self.contains(axis.flag())
    }

    /// Iterate over the selected axes (the STOW flag is not an axis).
    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        Axis::iter().filter(move |axis| self.selects(*axis))
    }

    /// Whether the STOW flag is set.
    pub fn is_stow(&self) -> bool {
        self.contains(AxisSet::STOW)
    }
}

bitflags! {
    /// Feed selector byte for the Feed On/Off command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FeedSet: u8 {
        /// S-band receive LNA
        const S_RX = 0b0000_0001;
        /// X-band receive LNA
        const X_RX = 0b0000_0010;
        /// Ka-band receive LNA
        const KA_RX = 0b0000_0100;
        /// X-band transmit path
        const X_TX = 0b0000_1000;
    }
}
