//! World slots owned by an instance.
//!
//! An instance holds at most one world in each of the three singleton slots
//! plus an unordered set of other worlds. A handle occupies at most one slot.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque host world handle, identified by world name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldHandle(pub String);

impl WorldHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorldHandle {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Where a world is attached to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldSlot {
    Primary,
    SecondaryA,
    SecondaryB,
    Other,
}

impl WorldSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::SecondaryA => "secondary_a",
            Self::SecondaryB => "secondary_b",
            Self::Other => "other",
        }
    }

    /// Whether the slot holds at most one world.
    pub fn is_singleton(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// The worlds of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldSet {
    primary: Option<WorldHandle>,
    secondary_a: Option<WorldHandle>,
    secondary_b: Option<WorldHandle>,
    other: HashSet<WorldHandle>,
}

impl WorldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(&self) -> Option<&WorldHandle> {
        self.primary.as_ref()
    }

    pub fn secondary_a(&self) -> Option<&WorldHandle> {
        self.secondary_a.as_ref()
    }

    pub fn secondary_b(&self) -> Option<&WorldHandle> {
        self.secondary_b.as_ref()
    }

    pub fn others(&self) -> impl Iterator<Item = &WorldHandle> {
        self.other.iter()
    }

    /// Occupant of a singleton slot. Always `None` for [`WorldSlot::Other`].
    pub fn occupant(&self, slot: WorldSlot) -> Option<&WorldHandle> {
        match slot {
            WorldSlot::Primary => self.primary.as_ref(),
            WorldSlot::SecondaryA => self.secondary_a.as_ref(),
            WorldSlot::SecondaryB => self.secondary_b.as_ref(),
            WorldSlot::Other => None,
        }
    }

    /// Slot currently holding `world`.
    pub fn slot_of(&self, world: &WorldHandle) -> Option<WorldSlot> {
        if self.primary.as_ref() == Some(world) {
            Some(WorldSlot::Primary)
        } else if self.secondary_a.as_ref() == Some(world) {
            Some(WorldSlot::SecondaryA)
        } else if self.secondary_b.as_ref() == Some(world) {
            Some(WorldSlot::SecondaryB)
        } else if self.other.contains(world) {
            Some(WorldSlot::Other)
        } else {
            None
        }
    }

    pub fn contains(&self, world: &WorldHandle) -> bool {
        self.slot_of(world).is_some()
    }

    /// Attach `world` to `slot`.
    ///
    /// Returns the previous occupant of a singleton slot, which is no longer
    /// part of the set. A world already attached elsewhere moves to `slot`.
    pub fn insert(&mut self, world: WorldHandle, slot: WorldSlot) -> Option<WorldHandle> {
        self.remove(&world);
        match slot {
            WorldSlot::Primary => self.primary.replace(world),
            WorldSlot::SecondaryA => self.secondary_a.replace(world),
            WorldSlot::SecondaryB => self.secondary_b.replace(world),
            WorldSlot::Other => {
                self.other.insert(world);
                None
            }
        }
    }

    /// Detach `world` from whichever slot holds it. Returns whether it was held.
    pub fn remove(&mut self, world: &WorldHandle) -> bool {
        let mut removed = false;
        for slot in [&mut self.primary, &mut self.secondary_a, &mut self.secondary_b] {
            if slot.as_ref() == Some(world) {
                *slot = None;
                removed = true;
            }
        }
        removed | self.other.remove(world)
    }

    /// All attached worlds, singleton slots first.
    pub fn handles(&self) -> Vec<WorldHandle> {
        let mut out: Vec<WorldHandle> = [&self.primary, &self.secondary_a, &self.secondary_b]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        let mut other: Vec<&WorldHandle> = self.other.iter().collect();
        other.sort();
        out.extend(other.into_iter().cloned());
        out
    }

    /// Detach everything, returning what was attached.
    pub fn clear(&mut self) -> Vec<WorldHandle> {
        let handles = self.handles();
        *self = Self::default();
        handles
    }

    pub fn len(&self) -> usize {
        [&self.primary, &self.secondary_a, &self.secondary_b]
            .into_iter()
            .filter(|s| s.is_some())
            .count()
            + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut other: Vec<&str> = self.other.iter().map(|w| w.name()).collect();
        other.sort_unstable();
        serde_json::json!({
            "primary": self.primary.as_ref().map(|w| w.name()),
            "secondary_a": self.secondary_a.as_ref().map(|w| w.name()),
            "secondary_b": self.secondary_b.as_ref().map(|w| w.name()),
            "other": other
        })
    }
}
