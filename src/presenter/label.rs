use crate::core::{GraveError, Millis, OwnerId, Position, RecordId, Result};
use crate::policy::LabelConfig;
use crate::world::{EntityHandle, World};
use std::collections::HashMap;
use std::sync::Arc;

/// Values a label may show. Built by the manager; presenters never see instances.
#[derive(Debug, Clone, Copy)]
pub struct LabelContext<'a> {
    pub record_id: RecordId,
    pub owner: OwnerId,
    pub position: &'a Position,
    pub death_time: Millis,
    pub protection_expire: Millis,
    pub despawn_time: Millis,
    pub now: Millis,
}

/// Host-supplied label formatting
pub trait LabelText: Send + Sync {
    /// Lines from top to bottom.
    fn lines(&self, ctx: &LabelContext<'_>) -> Vec<String>;
}

/// Owner id over record id, unformatted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLabelText;

impl LabelText for DefaultLabelText {
    fn lines(&self, ctx: &LabelContext<'_>) -> Vec<String> {
        vec![ctx.owner.to_string(), ctx.record_id.to_string()]
    }
}

struct LabelStack {
    tag: RecordId,
    handles: Vec<EntityHandle>,
}

/// Owns the label entities stacked above each tombstone
pub struct LabelPresenter<W: World> {
    world: Arc<W>,
    config: LabelConfig,
    sweep_radius: f64,
    stacks: HashMap<Position, LabelStack>,
}

impl<W: World> LabelPresenter<W> {
    pub fn new(world: Arc<W>, config: LabelConfig, sweep_radius: f64) -> Self {
        Self {
            world,
            config,
            sweep_radius,
            stacks: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Spawn one entity per line, first line highest. Replaces any stack at `pos`.
    pub fn create(&mut self, pos: &Position, id: RecordId, lines: &[String]) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        if self.stacks.contains_key(pos) {
            self.drop_stack(pos);
        }

        let mut handles = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let height = self.config.height_offset - i as f64 * self.config.line_spacing;
            match self.world.spawn_label(pos, height, line, id) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        if let Err(cleanup) = self.world.remove_entity(handle) {
                            log::warn!("failed to discard partial label at {}: {}", pos, cleanup);
                        }
                    }
                    return Err(GraveError::Presenter(format!(
                        "label at {} for {}: {}",
                        pos, id, err
                    )));
                }
            }
        }
        self.stacks.insert(pos.clone(), LabelStack { tag: id, handles });
        Ok(())
    }

    /// Respawn the lines at `pos` with new text.
    pub fn refresh(&mut self, pos: &Position, id: RecordId, lines: &[String]) -> Result<()> {
        self.drop_stack(pos);
        self.create(pos, id, lines)
    }

    /// Remove own entities, then any leftover label tagged `id` near `pos`.
    /// Every handle is attempted; the first failure is reported afterwards.
    pub fn remove(&mut self, pos: &Position, id: RecordId) -> Result<usize> {
        let mut removed = 0;
        let mut first_error: Option<GraveError> = None;

        if let Some(stack) = self.stacks.remove(pos) {
            for handle in stack.handles {
                match self.world.remove_entity(handle) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(err) => {
                        log::warn!("failed to remove label entity at {}: {}", pos, err);
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        match self.world.tagged_labels_near(pos, self.sweep_radius) {
            Ok(labels) => {
                for label in labels.into_iter().filter(|l| l.tag == id) {
                    match self.world.remove_entity(label.handle) {
                        Ok(true) => removed += 1,
                        Ok(false) => {}
                        Err(err) => {
                            log::warn!("failed to remove leftover label near {}: {}", pos, err);
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!("label sweep near {} failed: {}", pos, err);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(GraveError::Presenter(format!(
                "label removal at {}: {}",
                pos, err
            ))),
            None => Ok(removed),
        }
    }

    pub fn has(&self, pos: &Position) -> bool {
        self.stacks.contains_key(pos)
    }

    pub fn tag_at(&self, pos: &Position) -> Option<RecordId> {
        self.stacks.get(pos).map(|s| s.tag)
    }

    pub fn count(&self) -> usize {
        self.stacks.len()
    }

    /// Remove every owned entity and forget all stacks.
    pub fn shutdown(&mut self) -> usize {
        let positions: Vec<Position> = self.stacks.keys().cloned().collect();
        let mut removed = 0;
        for pos in positions {
            removed += self.drop_stack(&pos);
        }
        removed
    }

    fn drop_stack(&mut self, pos: &Position) -> usize {
        let Some(stack) = self.stacks.remove(pos) else {
            return 0;
        };
        let mut removed = 0;
        for handle in stack.handles {
            match self.world.remove_entity(handle) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => log::warn!("failed to remove label entity at {}: {}", pos, err),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimWorld;

    fn presenter() -> (Arc<SimWorld>, LabelPresenter<SimWorld>) {
        let world = Arc::new(SimWorld::with_worlds(&["world"]));
        let presenter = LabelPresenter::new(world.clone(), LabelConfig::default(), 2.0);
        (world, presenter)
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_stacks_lines_downwards() {
        let (world, mut labels) = presenter();
        let pos = Position::new("world", 0, 64, 0);
        labels.create(&pos, RecordId(1), &lines(&["top", "bottom"])).unwrap();
        assert_eq!(world.labels_at(&pos), vec!["bottom", "top"]);
        assert!(labels.has(&pos));
        assert_eq!(labels.tag_at(&pos), Some(RecordId(1)));
    }

    #[test]
    fn test_create_replaces_existing_stack() {
        let (world, mut labels) = presenter();
        let pos = Position::new("world", 0, 64, 0);
        labels.create(&pos, RecordId(1), &lines(&["a", "b"])).unwrap();
        labels.refresh(&pos, RecordId(1), &lines(&["c"])).unwrap();
        assert_eq!(world.labels_at(&pos), vec!["c"]);
        assert_eq!(world.label_count(), 1);
    }

    #[test]
    fn test_failed_create_leaves_nothing_behind() {
        let (world, mut labels) = presenter();
        let pos = Position::new("world", 0, 64, 0);
        world.inject(|f| f.label_spawn = true);
        assert!(labels.create(&pos, RecordId(1), &lines(&["a"])).is_err());
        assert!(!labels.has(&pos));
        assert_eq!(world.label_count(), 0);
    }

    #[test]
    fn test_remove_sweeps_leftovers_with_same_tag_only() {
        let (world, mut labels) = presenter();
        let pos = Position::new("world", 0, 64, 0);
        labels.create(&pos, RecordId(1), &lines(&["a"])).unwrap();
        world.spawn_stray_label(&pos.offset(1, 0, 0), RecordId(1));
        world.spawn_stray_label(&pos.offset(1, 0, 1), RecordId(2));

        assert_eq!(labels.remove(&pos, RecordId(1)).unwrap(), 2);
        assert_eq!(world.label_count(), 1);
        assert_eq!(labels.remove(&pos, RecordId(1)).unwrap(), 0);
    }

    #[test]
    fn test_remove_reports_failure_but_forgets_stack() {
        let (world, mut labels) = presenter();
        let pos = Position::new("world", 0, 64, 0);
        labels.create(&pos, RecordId(1), &lines(&["a"])).unwrap();
        world.inject(|f| f.label_removal = true);
        assert!(labels.remove(&pos, RecordId(1)).is_err());
        assert!(!labels.has(&pos));
        assert_eq!(world.label_count(), 1);
    }

    #[test]
    fn test_disabled_presenter_is_noop() {
        let world = Arc::new(SimWorld::with_worlds(&["world"]));
        let config = LabelConfig {
            enabled: false,
            ..LabelConfig::default()
        };
        let mut labels = LabelPresenter::new(world.clone(), config, 2.0);
        let pos = Position::new("world", 0, 64, 0);
        labels.create(&pos, RecordId(1), &lines(&["a"])).unwrap();
        assert_eq!(world.label_count(), 0);
        assert!(!labels.has(&pos));
    }

    #[test]
    fn test_shutdown_removes_everything() {
        let (world, mut labels) = presenter();
        labels
            .create(&Position::new("world", 0, 64, 0), RecordId(1), &lines(&["a", "b"]))
            .unwrap();
        labels
            .create(&Position::new("world", 9, 64, 0), RecordId(2), &lines(&["c"]))
            .unwrap();
        assert_eq!(labels.shutdown(), 3);
        assert_eq!(labels.count(), 0);
        assert_eq!(world.label_count(), 0);
    }
}
