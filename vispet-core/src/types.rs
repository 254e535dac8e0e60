//! Core type definitions for the VisPet companion system.
//!
//! Identity newtypes, positions, item stacks and the persisted inventory
//! record. Nothing here knows about a concrete game host.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Stable identifier of the player a companion is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    /// Create a new random owner ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Name of a world. Each world owns exactly one entity store and one task
/// queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(pub String);

impl WorldId {
    /// Create a world ID from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The world name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to an entity inside one world's entity store.
///
/// Handles are only meaningful together with the world that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef(pub u64);

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolved integer index of an effect asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectIndex(pub u32);

/// Unique token burned into one physical copy of a trial item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Serial(pub String);

impl Serial {
    /// Generate a fresh random serial.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The serial text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A 3D position in a world.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance to another position.
    #[must_use]
    pub fn distance_squared(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Offset this position.
    #[must_use]
    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// A stack of items in one inventory slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item asset ID.
    pub item_id: String,
    /// Stack size. Zero-sized stacks are treated as empty.
    pub quantity: u32,
    /// Serial metadata, present only on stamped trial items.
    pub serial: Option<Serial>,
}

impl ItemStack {
    /// Create a plain stack without metadata.
    #[must_use]
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            serial: None,
        }
    }

    /// Return a copy of this stack carrying the given serial.
    #[must_use]
    pub fn with_serial(mut self, serial: Serial) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Whether this stack counts as an empty slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.item_id.is_empty() || self.quantity == 0
    }
}

/// One persisted inventory line: `slot,itemId,quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Slot index inside the companion's hotbar.
    pub slot: u16,
    /// Item asset ID.
    pub item_id: String,
    /// Stack size (always positive).
    pub quantity: u32,
}

impl InventoryRecord {
    /// Create a record.
    #[must_use]
    pub fn new(slot: u16, item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            slot,
            item_id: item_id.into(),
            quantity,
        }
    }

    /// Convert back into a plain item stack.
    #[must_use]
    pub fn to_stack(&self) -> ItemStack {
        ItemStack::new(self.item_id.clone(), self.quantity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_id_parses_its_display() {
        let owner = OwnerId::new();
        let parsed: OwnerId = owner.to_string().parse().expect("parse");
        assert_eq!(parsed, owner);
    }

    #[test]
    fn empty_stacks() {
        assert!(ItemStack::new("", 3).is_empty());
        assert!(ItemStack::new("Bone", 0).is_empty());
        assert!(!ItemStack::new("Bone", 1).is_empty());
    }

    #[test]
    fn distance_squared() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert!((a.distance_squared(&b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn serials_are_unique() {
        assert_ne!(Serial::generate(), Serial::generate());
    }
}
