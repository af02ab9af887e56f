//! Device identifiers and the per-board slot table.
//!
//! Every configured device has a [`DeviceId`] that is unique within a board.
//! A [`BoardLayout`] lists the ids of each [`ComponentKind`] explicitly; the
//! position of an id within its kind's list is its [`SlotIndex`] in the
//! matching shared state region. Because the table rejects duplicate ids, the
//! slot assignment is injective per kind by construction and never changes
//! for the lifetime of the layout.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::consts::{MAX_SENSORS, MAX_VALVES};

// ─── DeviceId ───────────────────────────────────────────────────────

/// Board-unique device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u16);

impl DeviceId {
    /// Raw numeric value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for DeviceId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

// ─── ComponentKind ──────────────────────────────────────────────────

/// Kind of a configured device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ComponentKind {
    /// ADC input read through sysfs.
    Sensor = 0,
    /// GPIO output driving a valve.
    Valve = 1,
}

impl ComponentKind {
    /// Maximum number of slots for this kind.
    pub const fn max_slots(self) -> usize {
        match self {
            Self::Sensor => MAX_SENSORS,
            Self::Valve => MAX_VALVES,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor => write!(f, "sensor"),
            Self::Valve => write!(f, "valve"),
        }
    }
}

impl FromStr for ComponentKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(Self::Sensor),
            "valve" => Ok(Self::Valve),
            _ => Err(format!("unknown ComponentKind: {s:?}")),
        }
    }
}

// ─── SlotIndex ──────────────────────────────────────────────────────

/// Position of a device within its kind's shared state region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(u16);

impl SlotIndex {
    /// Create a slot index.
    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Slot as an array index.
    #[inline]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Legacy partition ───────────────────────────────────────────────

/// Arithmetic partition used by the first board revision: ids below
/// `board_id * 10 + 5` are valves, the rest are sensors.
///
/// Only demonstrated for the CACMO board. [`BoardLayout`] never uses it to
/// assign slots; configuration validation compares against it to flag
/// tables that disagree with the historical numbering.
pub const fn legacy_kind(board_id: u16, id: DeviceId) -> ComponentKind {
    if (id.0 as u32) < (board_id as u32) * 10 + 5 {
        ComponentKind::Valve
    } else {
        ComponentKind::Sensor
    }
}

// ─── BoardLayout ────────────────────────────────────────────────────

/// Slot table construction error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The same id appears twice (in one kind or across kinds).
    #[error("duplicate device id {id}")]
    DuplicateId {
        /// Offending id.
        id: DeviceId,
    },

    /// More devices of one kind than its region can hold.
    #[error("{count} {kind} devices exceed the maximum of {max}")]
    TooMany {
        /// Kind that overflowed.
        kind: ComponentKind,
        /// Configured count.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// Explicit per-board table mapping each device id to its kind and slot.
///
/// Built once from the board configuration and immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct BoardLayout {
    sensors: Vec<DeviceId>,
    valves: Vec<DeviceId>,
    index: HashMap<DeviceId, (ComponentKind, SlotIndex)>,
}

impl BoardLayout {
    /// Build a layout from the ordered id lists of each kind.
    ///
    /// # Errors
    /// - [`LayoutError::TooMany`] if a kind exceeds its region capacity.
    /// - [`LayoutError::DuplicateId`] if any id is listed twice.
    pub fn new<V, S>(valves: V, sensors: S) -> Result<Self, LayoutError>
    where
        V: IntoIterator<Item = DeviceId>,
        S: IntoIterator<Item = DeviceId>,
    {
        let valves: Vec<DeviceId> = valves.into_iter().collect();
        let sensors: Vec<DeviceId> = sensors.into_iter().collect();

        for (kind, ids) in [(ComponentKind::Valve, &valves), (ComponentKind::Sensor, &sensors)] {
            if ids.len() > kind.max_slots() {
                return Err(LayoutError::TooMany {
                    kind,
                    count: ids.len(),
                    max: kind.max_slots(),
                });
            }
        }

        let mut index = HashMap::with_capacity(valves.len() + sensors.len());
        for (kind, ids) in [(ComponentKind::Valve, &valves), (ComponentKind::Sensor, &sensors)] {
            for (slot, id) in ids.iter().enumerate() {
                // Bounded by max_slots above, which fits in u16.
                let entry = (kind, SlotIndex::new(slot as u16));
                if index.insert(*id, entry).is_some() {
                    return Err(LayoutError::DuplicateId { id: *id });
                }
            }
        }

        Ok(Self {
            sensors,
            valves,
            index,
        })
    }

    /// Kind and slot of a device id.
    #[inline]
    pub fn slot_of(&self, id: DeviceId) -> Option<(ComponentKind, SlotIndex)> {
        self.index.get(&id).copied()
    }

    /// Slot of a device id, only if it is of the requested kind.
    pub fn slot_for(&self, kind: ComponentKind, id: DeviceId) -> Option<SlotIndex> {
        match self.slot_of(id) {
            Some((k, slot)) if k == kind => Some(slot),
            _ => None,
        }
    }

    /// Device id stored at a slot of the given kind.
    pub fn id_at(&self, kind: ComponentKind, slot: SlotIndex) -> Option<DeviceId> {
        self.ids(kind).get(slot.get()).copied()
    }

    /// Ordered ids of one kind (slot order).
    pub fn ids(&self, kind: ComponentKind) -> &[DeviceId] {
        match kind {
            ComponentKind::Sensor => &self.sensors,
            ComponentKind::Valve => &self.valves,
        }
    }

    /// Number of slots of one kind.
    pub fn capacity(&self, kind: ComponentKind) -> usize {
        self.ids(kind).len()
    }

    /// Iterate `(slot, id)` pairs of one kind.
    pub fn slots(&self, kind: ComponentKind) -> impl Iterator<Item = (SlotIndex, DeviceId)> + '_ {
        self.ids(kind)
            .iter()
            .enumerate()
            .map(|(slot, id)| (SlotIndex::new(slot as u16), *id))
    }

    /// Total number of configured devices.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no device is configured.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u16]) -> Vec<DeviceId> {
        raw.iter().copied().map(DeviceId).collect()
    }

    #[test]
    fn cacmo_layout() {
        let layout = BoardLayout::new(ids(&[10, 11, 12, 13]), ids(&[15, 16, 17, 18])).unwrap();
        assert_eq!(layout.len(), 8);
        assert_eq!(
            layout.slot_of(DeviceId(10)),
            Some((ComponentKind::Valve, SlotIndex::new(0)))
        );
        assert_eq!(
            layout.slot_of(DeviceId(17)),
            Some((ComponentKind::Sensor, SlotIndex::new(2)))
        );
        assert_eq!(layout.slot_of(DeviceId(14)), None);
        assert_eq!(
            layout.id_at(ComponentKind::Sensor, SlotIndex::new(3)),
            Some(DeviceId(18))
        );
        assert_eq!(layout.id_at(ComponentKind::Sensor, SlotIndex::new(4)), None);
    }

    #[test]
    fn slot_for_checks_kind() {
        let layout = BoardLayout::new(ids(&[10]), ids(&[15])).unwrap();
        assert!(layout.slot_for(ComponentKind::Valve, DeviceId(10)).is_some());
        assert!(layout.slot_for(ComponentKind::Sensor, DeviceId(10)).is_none());
    }

    #[test]
    fn duplicate_across_kinds_rejected() {
        let err = BoardLayout::new(ids(&[10, 11]), ids(&[11])).unwrap_err();
        assert_eq!(err, LayoutError::DuplicateId { id: DeviceId(11) });
    }

    #[test]
    fn duplicate_within_kind_rejected() {
        let err = BoardLayout::new(ids(&[]), ids(&[15, 15])).unwrap_err();
        assert_eq!(err, LayoutError::DuplicateId { id: DeviceId(15) });
    }

    #[test]
    fn capacity_enforced() {
        let too_many: Vec<DeviceId> = (0..=MAX_VALVES as u16).map(DeviceId).collect();
        let err = BoardLayout::new(too_many, ids(&[])).unwrap_err();
        assert!(matches!(err, LayoutError::TooMany { kind: ComponentKind::Valve, .. }));
    }

    #[test]
    fn legacy_rule_matches_cacmo_numbering() {
        for id in 10..15 {
            assert_eq!(legacy_kind(1, DeviceId(id)), ComponentKind::Valve);
        }
        for id in 15..20 {
            assert_eq!(legacy_kind(1, DeviceId(id)), ComponentKind::Sensor);
        }
    }

    #[test]
    fn kind_from_str_roundtrip() {
        for kind in [ComponentKind::Sensor, ComponentKind::Valve] {
            assert_eq!(kind.to_string().parse::<ComponentKind>().unwrap(), kind);
        }
        assert!("pump".parse::<ComponentKind>().is_err());
    }
}
