//! Reconciliation of world artifacts against live tombstones.
//!
//! Markers, labels and effects carry the record id they belong to. Anything
//! tagged with an id outside the live set is drift and gets removed. Scan
//! failures are counted and logged; a sweep never aborts part way.

use crate::core::{Position, RecordId};
use crate::world::World;
use std::collections::HashSet;
use std::sync::Arc;

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub markers: usize,
    pub labels: usize,
    pub effects: usize,
    /// Regions or worlds whose scan failed
    pub failed_regions: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.markers + self.labels + self.effects
    }

    pub fn is_clean(&self) -> bool {
        self.removed() == 0 && self.failed_regions == 0
    }
}

pub struct ReconciliationSweeper<W: World> {
    world: Arc<W>,
}

impl<W: World> ReconciliationSweeper<W> {
    pub fn new(world: Arc<W>) -> Self {
        Self { world }
    }

    /// Sweep every loaded world.
    pub fn cleanup_all(&self, live: &HashSet<RecordId>) -> SweepReport {
        let mut report = SweepReport::default();
        for world in self.world.loaded_worlds() {
            self.sweep_markers(&world, live, &mut report);
            self.sweep_labels(&world, |tag| !live.contains(&tag), &mut report);
            self.sweep_effects(&world, |_, tag| !live.contains(&tag), &mut report);
        }
        if report.removed() > 0 || report.failed_regions > 0 {
            log::info!(
                "reconciliation removed {} markers, {} labels, {} effects ({} scans failed)",
                report.markers,
                report.labels,
                report.effects,
                report.failed_regions
            );
        }
        report
    }

    /// Sweep the box of `radius` blocks around `center`.
    pub fn cleanup_at(
        &self,
        center: &Position,
        radius: f64,
        live: &HashSet<RecordId>,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        if !self.world.world_loaded(&center.world) {
            report.failed_regions += 1;
            return report;
        }

        let reach = radius.max(0.0).floor() as i32;
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let pos = center.offset(dx, dy, dz);
                    match self.world.marker_tag(&pos) {
                        Ok(Some(tag)) if !live.contains(&tag) => {
                            self.remove_marker(&pos, &mut report)
                        }
                        Ok(_) => {}
                        Err(err) => log::debug!("marker probe at {} failed: {}", pos, err),
                    }
                }
            }
        }

        match self.world.tagged_labels_near(center, radius) {
            Ok(labels) => {
                for label in labels.into_iter().filter(|l| !live.contains(&l.tag)) {
                    match self.world.remove_entity(label.handle) {
                        Ok(true) => report.labels += 1,
                        Ok(false) => {}
                        Err(err) => log::warn!("failed to remove label near {}: {}", center, err),
                    }
                }
            }
            Err(err) => {
                log::warn!("label scan near {} failed: {}", center, err);
                report.failed_regions += 1;
            }
        }

        self.sweep_effects(
            &center.world,
            |pos, tag| pos.within_box(center, radius) && !live.contains(&tag),
            &mut report,
        );
        report
    }

    /// Remove labels and effects tagged `id`, in one world or all loaded worlds.
    pub fn cleanup_by_record_id(&self, id: RecordId, world: Option<&str>) -> SweepReport {
        let mut report = SweepReport::default();
        let worlds = match world {
            Some(name) => vec![name.to_string()],
            None => self.world.loaded_worlds(),
        };
        for world in worlds {
            self.sweep_labels(&world, |tag| tag == id, &mut report);
            self.sweep_effects(&world, |_, tag| tag == id, &mut report);
        }
        report
    }

    fn sweep_markers(&self, world: &str, live: &HashSet<RecordId>, report: &mut SweepReport) {
        let regions = match self.world.loaded_regions(world) {
            Ok(regions) => regions,
            Err(err) => {
                log::warn!("cannot list regions of {}: {}", world, err);
                report.failed_regions += 1;
                return;
            }
        };
        for region in regions {
            match self.world.tagged_markers_in(&region) {
                Ok(markers) => {
                    for marker in markers.into_iter().filter(|m| !live.contains(&m.tag)) {
                        self.remove_marker(&marker.position, report);
                    }
                }
                Err(err) => {
                    log::warn!("marker scan of {} failed: {}", region, err);
                    report.failed_regions += 1;
                }
            }
        }
    }

    fn sweep_labels(
        &self,
        world: &str,
        stale: impl Fn(RecordId) -> bool,
        report: &mut SweepReport,
    ) {
        match self.world.tagged_labels(world) {
            Ok(labels) => {
                for label in labels.into_iter().filter(|l| stale(l.tag)) {
                    match self.world.remove_entity(label.handle) {
                        Ok(true) => report.labels += 1,
                        Ok(false) => {}
                        Err(err) => log::warn!(
                            "failed to remove label of {} at {}: {}",
                            label.tag,
                            label.anchor,
                            err
                        ),
                    }
                }
            }
            Err(err) => {
                log::warn!("label scan of {} failed: {}", world, err);
                report.failed_regions += 1;
            }
        }
    }

    fn sweep_effects(
        &self,
        world: &str,
        stale: impl Fn(&Position, RecordId) -> bool,
        report: &mut SweepReport,
    ) {
        match self.world.effects(world) {
            Ok(effects) => {
                for effect in effects.into_iter().filter(|e| stale(&e.position, e.tag)) {
                    match self.world.stop_effect(effect.handle) {
                        Ok(true) => report.effects += 1,
                        Ok(false) => {}
                        Err(err) => log::warn!(
                            "failed to stop effect of {} at {}: {}",
                            effect.tag,
                            effect.position,
                            err
                        ),
                    }
                }
            }
            Err(err) => {
                log::warn!("effect scan of {} failed: {}", world, err);
                report.failed_regions += 1;
            }
        }
    }

    fn remove_marker(&self, pos: &Position, report: &mut SweepReport) {
        match self.world.clear_block(pos) {
            Ok(()) => report.markers += 1,
            Err(err) => log::warn!("failed to clear orphan marker at {}: {}", pos, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MarkerKind;
    use crate::world::{RegionId, SimWorld};

    fn setup() -> (Arc<SimWorld>, ReconciliationSweeper<SimWorld>) {
        let world = Arc::new(SimWorld::with_worlds(&["world", "nether"]));
        let sweeper = ReconciliationSweeper::new(world.clone());
        (world, sweeper)
    }

    #[test]
    fn test_cleanup_all_keeps_live_artifacts() {
        let (world, sweeper) = setup();
        let live_pos = Position::new("world", 0, 64, 0);
        let orphan_pos = Position::new("nether", 100, 30, 100);
        world.place_marker(&live_pos, MarkerKind::Chest, RecordId(1)).unwrap();
        world.place_marker(&orphan_pos, MarkerKind::Chest, RecordId(2)).unwrap();
        world.spawn_stray_label(&live_pos, RecordId(1));
        world.spawn_stray_label(&orphan_pos, RecordId(2));
        world.spawn_stray_effect(&orphan_pos, RecordId(2));

        let live: HashSet<RecordId> = [RecordId(1)].into_iter().collect();
        let report = sweeper.cleanup_all(&live);
        assert_eq!(report.markers, 1);
        assert_eq!(report.labels, 1);
        assert_eq!(report.effects, 1);
        assert_eq!(world.marker_tag(&live_pos).unwrap(), Some(RecordId(1)));
        assert_eq!(world.marker_tag(&orphan_pos).unwrap(), None);
        assert!(sweeper.cleanup_all(&live).is_clean());
    }

    #[test]
    fn test_broken_region_does_not_abort_sweep() {
        let (world, sweeper) = setup();
        let broken = Position::new("world", 0, 64, 0);
        let fine = Position::new("world", 64, 64, 64);
        world.place_marker(&broken, MarkerKind::Chest, RecordId(1)).unwrap();
        world.place_marker(&fine, MarkerKind::Chest, RecordId(2)).unwrap();
        world.inject(|f| {
            f.broken_regions.insert(RegionId::containing(&broken));
        });

        let report = sweeper.cleanup_all(&HashSet::new());
        assert_eq!(report.failed_regions, 1);
        assert_eq!(report.markers, 1);
        assert_eq!(world.marker_tag(&fine).unwrap(), None);
        assert_eq!(world.marker_tag(&broken).unwrap(), Some(RecordId(1)));
    }

    #[test]
    fn test_cleanup_at_is_scoped() {
        let (world, sweeper) = setup();
        let center = Position::new("world", 0, 64, 0);
        let near = center.offset(2, 0, 0);
        let far = center.offset(20, 0, 0);
        world.place_marker(&near, MarkerKind::Chest, RecordId(1)).unwrap();
        world.place_marker(&far, MarkerKind::Chest, RecordId(2)).unwrap();
        world.spawn_stray_effect(&near, RecordId(1));
        world.spawn_stray_effect(&far, RecordId(2));

        let report = sweeper.cleanup_at(&center, 5.0, &HashSet::new());
        assert_eq!(report.markers, 1);
        assert_eq!(report.effects, 1);
        assert_eq!(world.marker_tag(&far).unwrap(), Some(RecordId(2)));
        assert!(world.effect_at(&far));
    }

    #[test]
    fn test_cleanup_by_record_id() {
        let (world, sweeper) = setup();
        let pos = Position::new("world", 0, 64, 0);
        world.spawn_stray_label(&pos, RecordId(7));
        world.spawn_stray_label(&Position::new("nether", 0, 64, 0), RecordId(7));
        world.spawn_stray_label(&pos, RecordId(8));
        world.spawn_stray_effect(&pos, RecordId(7));

        let report = sweeper.cleanup_by_record_id(RecordId(7), Some("world"));
        assert_eq!(report.labels, 1);
        assert_eq!(report.effects, 1);

        let report = sweeper.cleanup_by_record_id(RecordId(7), None);
        assert_eq!(report.labels, 1);
        assert_eq!(world.label_count(), 1);
    }
}
