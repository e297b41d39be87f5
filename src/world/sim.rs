//! In-process world used by tests and host dry runs.
//!
//! Cells default to air. Every capability can be made to fail through
//! [`Faults`] so partial-failure paths can be exercised deterministically.

use super::{
    BlockKind, EffectHandle, EffectSpec, EntityHandle, RegionId, TaggedEffect, TaggedLabel,
    TaggedMarker, World,
};
use crate::core::{GraveError, Position, RecordId, Result};
use crate::policy::MarkerKind;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

/// Failure switches
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub marker_place: bool,
    pub block_clear: bool,
    pub label_spawn: bool,
    pub label_removal: bool,
    pub effect_start: bool,
    pub effect_stop: bool,
    /// Regions whose marker scan fails
    pub broken_regions: HashSet<RegionId>,
}

#[derive(Debug, Clone)]
struct Cell {
    kind: BlockKind,
    tag: Option<RecordId>,
}

#[derive(Debug, Default)]
struct Dimension {
    loaded: bool,
    cells: HashMap<(i32, i32, i32), Cell>,
}

#[derive(Debug, Clone)]
struct SimLabel {
    anchor: Position,
    height: f64,
    line: String,
    tag: RecordId,
}

#[derive(Debug, Clone)]
struct SimEffect {
    position: Position,
    spec: EffectSpec,
    tag: RecordId,
}

#[derive(Debug, Default)]
struct SimState {
    worlds: BTreeMap<String, Dimension>,
    labels: BTreeMap<u64, SimLabel>,
    effects: BTreeMap<u64, SimEffect>,
    next_handle: u64,
    faults: Faults,
}

impl SimState {
    fn loaded(&self, world: &str) -> Result<&Dimension> {
        self.worlds
            .get(world)
            .filter(|d| d.loaded)
            .ok_or_else(|| GraveError::World(format!("world '{}' is not loaded", world)))
    }

    fn loaded_mut(&mut self, world: &str) -> Result<&mut Dimension> {
        self.worlds
            .get_mut(world)
            .filter(|d| d.loaded)
            .ok_or_else(|| GraveError::World(format!("world '{}' is not loaded", world)))
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

fn key(pos: &Position) -> (i32, i32, i32) {
    (pos.x, pos.y, pos.z)
}

#[derive(Debug, Default)]
pub struct SimWorld {
    state: Mutex<SimState>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// A world with the given dimensions loaded.
    pub fn with_worlds(names: &[&str]) -> Self {
        let world = Self::new();
        for name in names {
            world.load_world(name);
        }
        world
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub fn load_world(&self, name: &str) {
        self.with_state(|s| s.worlds.entry(name.to_string()).or_default().loaded = true);
    }

    pub fn unload_world(&self, name: &str) {
        self.with_state(|s| {
            if let Some(dimension) = s.worlds.get_mut(name) {
                dimension.loaded = false;
            }
        });
    }

    pub fn set_block(&self, pos: &Position, kind: BlockKind) {
        self.with_state(|s| {
            let dimension = s.worlds.entry(pos.world.clone()).or_default();
            dimension.cells.insert(key(pos), Cell { kind, tag: None });
        });
    }

    /// Fill the box `radius` around `center` with a solid block.
    pub fn fill_solid(&self, center: &Position, radius: i32, material: &str) {
        for dx in -radius..=radius {
            for dy in -radius..=radius {
                for dz in -radius..=radius {
                    self.set_block(
                        &center.offset(dx, dy, dz),
                        BlockKind::Solid(material.to_string()),
                    );
                }
            }
        }
    }

    /// Overwrite the tag on whatever is at `pos`.
    pub fn retag(&self, pos: &Position, tag: Option<RecordId>) {
        self.with_state(|s| {
            if let Some(cell) = s
                .worlds
                .get_mut(&pos.world)
                .and_then(|d| d.cells.get_mut(&key(pos)))
            {
                cell.tag = tag;
            }
        });
    }

    pub fn inject(&self, f: impl FnOnce(&mut Faults)) {
        self.with_state(|s| f(&mut s.faults));
    }

    pub fn clear_faults(&self) {
        self.with_state(|s| s.faults = Faults::default());
    }

    /// Spawn a label that no presenter knows about.
    pub fn spawn_stray_label(&self, anchor: &Position, tag: RecordId) -> EntityHandle {
        self.with_state(|s| {
            let handle = s.next_handle();
            s.labels.insert(
                handle,
                SimLabel {
                    anchor: anchor.clone(),
                    height: 1.5,
                    line: String::new(),
                    tag,
                },
            );
            EntityHandle(handle)
        })
    }

    /// Start an effect that no presenter knows about.
    pub fn spawn_stray_effect(&self, pos: &Position, tag: RecordId) -> EffectHandle {
        self.with_state(|s| {
            let handle = s.next_handle();
            s.effects.insert(
                handle,
                SimEffect {
                    position: pos.clone(),
                    spec: EffectSpec {
                        kind: "soul".to_string(),
                        interval_ticks: 20,
                        count: 1,
                        range: 0.5,
                    },
                    tag,
                },
            );
            EffectHandle(handle)
        })
    }

    /// Label lines anchored at `pos`, bottom to top.
    pub fn labels_at(&self, pos: &Position) -> Vec<String> {
        self.with_state(|s| {
            let mut lines: Vec<(f64, String)> = s
                .labels
                .values()
                .filter(|l| &l.anchor == pos)
                .map(|l| (l.height, l.line.clone()))
                .collect();
            lines.sort_by(|a, b| a.0.total_cmp(&b.0));
            lines.into_iter().map(|(_, line)| line).collect()
        })
    }

    pub fn label_count(&self) -> usize {
        self.with_state(|s| s.labels.len())
    }

    pub fn effect_count(&self) -> usize {
        self.with_state(|s| s.effects.len())
    }

    pub fn effect_at(&self, pos: &Position) -> bool {
        self.with_state(|s| s.effects.values().any(|e| &e.position == pos))
    }

    pub fn effect_kind_at(&self, pos: &Position) -> Option<String> {
        self.with_state(|s| {
            s.effects
                .values()
                .find(|e| &e.position == pos)
                .map(|e| e.spec.kind.clone())
        })
    }

    pub fn marker_count(&self) -> usize {
        self.with_state(|s| {
            s.worlds
                .values()
                .flat_map(|d| d.cells.values())
                .filter(|c| matches!(c.kind, BlockKind::Marker(_)))
                .count()
        })
    }
}

impl World for SimWorld {
    fn block_at(&self, pos: &Position) -> Result<BlockKind> {
        self.with_state(|s| {
            let dimension = s.loaded(&pos.world)?;
            Ok(dimension
                .cells
                .get(&key(pos))
                .map(|c| c.kind.clone())
                .unwrap_or(BlockKind::Air))
        })
    }

    fn place_marker(&self, pos: &Position, kind: MarkerKind, tag: RecordId) -> Result<()> {
        self.with_state(|s| {
            if s.faults.marker_place {
                return Err(GraveError::World(format!("cannot place marker at {}", pos)));
            }
            let dimension = s.loaded_mut(&pos.world)?;
            dimension.cells.insert(
                key(pos),
                Cell {
                    kind: BlockKind::Marker(kind),
                    tag: Some(tag),
                },
            );
            Ok(())
        })
    }

    fn clear_block(&self, pos: &Position) -> Result<()> {
        self.with_state(|s| {
            if s.faults.block_clear {
                return Err(GraveError::World(format!("cannot clear block at {}", pos)));
            }
            let dimension = s.loaded_mut(&pos.world)?;
            dimension.cells.remove(&key(pos));
            Ok(())
        })
    }

    fn marker_tag(&self, pos: &Position) -> Result<Option<RecordId>> {
        self.with_state(|s| {
            let dimension = s.loaded(&pos.world)?;
            Ok(dimension
                .cells
                .get(&key(pos))
                .filter(|c| matches!(c.kind, BlockKind::Marker(_)))
                .and_then(|c| c.tag))
        })
    }

    fn world_loaded(&self, world: &str) -> bool {
        self.with_state(|s| s.loaded(world).is_ok())
    }

    fn loaded_worlds(&self) -> Vec<String> {
        self.with_state(|s| {
            s.worlds
                .iter()
                .filter(|(_, d)| d.loaded)
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    fn loaded_regions(&self, world: &str) -> Result<Vec<RegionId>> {
        self.with_state(|s| {
            let dimension = s.loaded(world)?;
            let regions: BTreeSet<RegionId> = dimension
                .cells
                .keys()
                .map(|&(x, y, z)| RegionId::containing(&Position::new(world, x, y, z)))
                .collect();
            Ok(regions.into_iter().collect())
        })
    }

    fn tagged_markers_in(&self, region: &RegionId) -> Result<Vec<TaggedMarker>> {
        self.with_state(|s| {
            if s.faults.broken_regions.contains(region) {
                return Err(GraveError::World(format!("region {} failed to scan", region)));
            }
            let dimension = s.loaded(&region.world)?;
            let mut markers: Vec<TaggedMarker> = dimension
                .cells
                .iter()
                .filter_map(|(&(x, y, z), cell)| {
                    let position = Position::new(region.world.clone(), x, y, z);
                    match (&cell.kind, cell.tag) {
                        (BlockKind::Marker(_), Some(tag))
                            if RegionId::containing(&position) == *region =>
                        {
                            Some(TaggedMarker { position, tag })
                        }
                        _ => None,
                    }
                })
                .collect();
            markers.sort_by(|a, b| a.position.cmp(&b.position));
            Ok(markers)
        })
    }

    fn spawn_label(
        &self,
        anchor: &Position,
        height: f64,
        line: &str,
        tag: RecordId,
    ) -> Result<EntityHandle> {
        self.with_state(|s| {
            if s.faults.label_spawn {
                return Err(GraveError::World(format!("cannot spawn label at {}", anchor)));
            }
            s.loaded(&anchor.world)?;
            let handle = s.next_handle();
            s.labels.insert(
                handle,
                SimLabel {
                    anchor: anchor.clone(),
                    height,
                    line: line.to_string(),
                    tag,
                },
            );
            Ok(EntityHandle(handle))
        })
    }

    fn tagged_labels(&self, world: &str) -> Result<Vec<TaggedLabel>> {
        self.with_state(|s| {
            s.loaded(world)?;
            Ok(s.labels
                .iter()
                .filter(|(_, l)| l.anchor.world == world)
                .map(|(&handle, l)| TaggedLabel {
                    handle: EntityHandle(handle),
                    anchor: l.anchor.clone(),
                    tag: l.tag,
                })
                .collect())
        })
    }

    fn tagged_labels_near(&self, pos: &Position, radius: f64) -> Result<Vec<TaggedLabel>> {
        self.with_state(|s| {
            s.loaded(&pos.world)?;
            Ok(s.labels
                .iter()
                .filter(|(_, l)| l.anchor.within_box(pos, radius))
                .map(|(&handle, l)| TaggedLabel {
                    handle: EntityHandle(handle),
                    anchor: l.anchor.clone(),
                    tag: l.tag,
                })
                .collect())
        })
    }

    fn remove_entity(&self, handle: EntityHandle) -> Result<bool> {
        self.with_state(|s| {
            if s.faults.label_removal {
                return Err(GraveError::World(format!("cannot remove entity {}", handle.0)));
            }
            Ok(s.labels.remove(&handle.0).is_some())
        })
    }

    fn start_effect(
        &self,
        pos: &Position,
        spec: &EffectSpec,
        tag: RecordId,
    ) -> Result<EffectHandle> {
        self.with_state(|s| {
            if s.faults.effect_start {
                return Err(GraveError::World(format!("cannot start effect at {}", pos)));
            }
            s.loaded(&pos.world)?;
            let handle = s.next_handle();
            s.effects.insert(
                handle,
                SimEffect {
                    position: pos.clone(),
                    spec: spec.clone(),
                    tag,
                },
            );
            Ok(EffectHandle(handle))
        })
    }

    fn stop_effect(&self, handle: EffectHandle) -> Result<bool> {
        self.with_state(|s| {
            if s.faults.effect_stop {
                return Err(GraveError::World(format!("cannot stop effect {}", handle.0)));
            }
            Ok(s.effects.remove(&handle.0).is_some())
        })
    }

    fn effects(&self, world: &str) -> Result<Vec<TaggedEffect>> {
        self.with_state(|s| {
            s.loaded(world)?;
            Ok(s.effects
                .iter()
                .filter(|(_, e)| e.position.world == world)
                .map(|(&handle, e)| TaggedEffect {
                    handle: EffectHandle(handle),
                    position: e.position.clone(),
                    tag: e.tag,
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_tag_round_trip() {
        let world = SimWorld::with_worlds(&["world"]);
        let pos = Position::new("world", 3, 64, -20);
        assert_eq!(world.block_at(&pos).unwrap(), BlockKind::Air);
        world.place_marker(&pos, MarkerKind::Chest, RecordId(9)).unwrap();
        assert_eq!(world.marker_tag(&pos).unwrap(), Some(RecordId(9)));
        world.clear_block(&pos).unwrap();
        assert_eq!(world.marker_tag(&pos).unwrap(), None);
        world.clear_block(&pos).unwrap();
    }

    #[test]
    fn test_unloaded_world_errors() {
        let world = SimWorld::with_worlds(&["world"]);
        world.unload_world("world");
        let pos = Position::new("world", 0, 0, 0);
        assert!(world.block_at(&pos).is_err());
        assert!(!world.world_loaded("world"));
        assert!(world.loaded_worlds().is_empty());
    }

    #[test]
    fn test_regions_and_broken_scan() {
        let world = SimWorld::with_worlds(&["world"]);
        let a = Position::new("world", 1, 64, 1);
        let b = Position::new("world", 40, 64, 1);
        world.place_marker(&a, MarkerKind::Chest, RecordId(1)).unwrap();
        world.place_marker(&b, MarkerKind::Chest, RecordId(2)).unwrap();

        let regions = world.loaded_regions("world").unwrap();
        assert_eq!(regions.len(), 2);
        let markers = world.tagged_markers_in(&RegionId::containing(&a)).unwrap();
        assert_eq!(markers, vec![TaggedMarker { position: a.clone(), tag: RecordId(1) }]);

        world.inject(|f| {
            f.broken_regions.insert(RegionId::containing(&b));
        });
        assert!(world.tagged_markers_in(&RegionId::containing(&b)).is_err());
    }

    #[test]
    fn test_labels_near_and_removal() {
        let world = SimWorld::with_worlds(&["world"]);
        let pos = Position::new("world", 0, 64, 0);
        let handle = world.spawn_label(&pos, 1.5, "line", RecordId(4)).unwrap();
        world.spawn_stray_label(&pos.offset(5, 0, 0), RecordId(4));

        assert_eq!(world.tagged_labels_near(&pos, 2.0).unwrap().len(), 1);
        assert_eq!(world.tagged_labels("world").unwrap().len(), 2);
        assert!(world.remove_entity(handle).unwrap());
        assert!(!world.remove_entity(handle).unwrap());
    }

    #[test]
    fn test_fault_injection() {
        let world = SimWorld::with_worlds(&["world"]);
        let pos = Position::new("world", 0, 64, 0);
        world.inject(|f| f.label_spawn = true);
        assert!(world.spawn_label(&pos, 1.5, "x", RecordId(1)).is_err());
        world.clear_faults();
        assert!(world.spawn_label(&pos, 1.5, "x", RecordId(1)).is_ok());
    }
}
