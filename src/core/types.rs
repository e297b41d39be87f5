use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Epoch milliseconds.
pub type Millis = i64;

/// Integer block coordinates inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            world: self.world.clone(),
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Squared euclidean distance, `None` across worlds.
    pub fn distance_squared(&self, other: &Position) -> Option<i64> {
        if self.world != other.world {
            return None;
        }
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        let dz = i64::from(self.z - other.z);
        Some(dx * dx + dy * dy + dz * dz)
    }

    /// Whether `other` is within `radius` blocks on every axis.
    pub fn within_box(&self, other: &Position, radius: f64) -> bool {
        self.world == other.world
            && f64::from((self.x - other.x).abs()) <= radius
            && f64::from((self.y - other.y).abs()) <= radius
            && f64::from((self.z - other.z).abs()) <= radius
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{},{})", self.world, self.x, self.y, self.z)
    }
}

/// Opaque player identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    pub fn new_v4() -> Self {
        OwnerId(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(OwnerId)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned tombstone id; also the tag carried by markers, labels and effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A durable tombstone row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TombstoneRecord {
    pub id: RecordId,
    pub owner: OwnerId,
    pub position: Position,
    pub death_time: Millis,
    pub protection_expire: Millis,
    pub despawn_time: Millis,
    pub experience: u32,
}

/// Everything a backend needs to insert a record; the id is assigned on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTombstone {
    pub owner: OwnerId,
    pub position: Position,
    pub death_time: Millis,
    pub protection_expire: Millis,
    pub despawn_time: Millis,
    pub experience: u32,
}

impl NewTombstone {
    pub fn with_id(self, id: RecordId) -> TombstoneRecord {
        TombstoneRecord {
            id,
            owner: self.owner,
            position: self.position,
            death_time: self.death_time,
            protection_expire: self.protection_expire,
            despawn_time: self.despawn_time,
            experience: self.experience,
        }
    }
}

/// Durable item row. `slot_index` is the origin inventory slot, never a display position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEntry {
    pub slot_index: u32,
    pub payload: Vec<u8>,
}

impl ItemEntry {
    pub fn new(slot_index: u32, payload: Vec<u8>) -> Self {
        Self {
            slot_index,
            payload,
        }
    }
}
