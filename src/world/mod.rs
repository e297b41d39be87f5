//! World capability consumed by the manager, presenters and sweeper.
//!
//! The host implements [`World`] over its real block/entity API. All calls
//! happen on the main domain; implementations only need interior mutability,
//! not cross-thread coordination.

pub mod block;
pub mod sim;

pub use block::BlockKind;
pub use sim::SimWorld;

use crate::core::{Position, RecordId, Result};
use crate::policy::MarkerKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a spawned label entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u64);

/// Handle of a running ambient effect loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectHandle(pub u64);

/// A loaded chunk-sized region of one world
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId {
    pub world: String,
    pub x: i32,
    pub z: i32,
}

impl RegionId {
    pub const SIZE: i32 = 16;

    pub fn containing(pos: &Position) -> Self {
        Self {
            world: pos.world.clone(),
            x: pos.x.div_euclid(Self::SIZE),
            z: pos.z.div_euclid(Self::SIZE),
        }
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{}]", self.world, self.x, self.z)
    }
}

/// Marker block carrying a record tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedMarker {
    pub position: Position,
    pub tag: RecordId,
}

/// Label entity carrying a record tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedLabel {
    pub handle: EntityHandle,
    /// Block the label stack belongs to
    pub anchor: Position,
    pub tag: RecordId,
}

/// Running effect loop carrying a record tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEffect {
    pub handle: EffectHandle,
    pub position: Position,
    pub tag: RecordId,
}

/// Parameters of an ambient effect loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    pub kind: String,
    pub interval_ticks: u32,
    pub count: u32,
    pub range: f64,
}

/// Block and entity operations the core needs from the host
pub trait World: Send + Sync {
    fn block_at(&self, pos: &Position) -> Result<BlockKind>;

    /// Place a marker block and attach `tag` to it durably.
    fn place_marker(&self, pos: &Position, kind: MarkerKind, tag: RecordId) -> Result<()>;

    /// Set the cell to air, dropping any tag. Clearing air is a no-op.
    fn clear_block(&self, pos: &Position) -> Result<()>;

    /// Tag of the marker at `pos`, if the cell holds a tagged marker.
    fn marker_tag(&self, pos: &Position) -> Result<Option<RecordId>>;

    fn world_loaded(&self, world: &str) -> bool;

    fn loaded_worlds(&self) -> Vec<String>;

    fn loaded_regions(&self, world: &str) -> Result<Vec<RegionId>>;

    fn tagged_markers_in(&self, region: &RegionId) -> Result<Vec<TaggedMarker>>;

    /// Spawn one text line `height` blocks above `anchor`.
    fn spawn_label(
        &self,
        anchor: &Position,
        height: f64,
        line: &str,
        tag: RecordId,
    ) -> Result<EntityHandle>;

    fn tagged_labels(&self, world: &str) -> Result<Vec<TaggedLabel>>;

    fn tagged_labels_near(&self, pos: &Position, radius: f64) -> Result<Vec<TaggedLabel>>;

    /// Remove a label entity; `false` when it was already gone.
    fn remove_entity(&self, handle: EntityHandle) -> Result<bool>;

    fn start_effect(&self, pos: &Position, spec: &EffectSpec, tag: RecordId)
    -> Result<EffectHandle>;

    /// Stop an effect loop; `false` when it was already stopped.
    fn stop_effect(&self, handle: EffectHandle) -> Result<bool>;

    fn effects(&self, world: &str) -> Result<Vec<TaggedEffect>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_containing_negative_coords() {
        let region = RegionId::containing(&Position::new("world", -1, 64, 17));
        assert_eq!(region.x, -1);
        assert_eq!(region.z, 1);
        assert_eq!(region.to_string(), "world[-1,1]");
    }
}
