use crate::core::{GraveError, Position, RecordId, Result};
use crate::policy::EffectConfig;
use crate::world::{EffectHandle, EffectSpec, World};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns the ambient effect loop running at each tombstone
pub struct EffectPresenter<W: World> {
    world: Arc<W>,
    enabled: bool,
    spec: EffectSpec,
    loops: HashMap<Position, (RecordId, EffectHandle)>,
}

impl<W: World> EffectPresenter<W> {
    pub fn new(world: Arc<W>, config: &EffectConfig) -> Self {
        Self {
            world,
            enabled: config.enabled,
            spec: config.spec(),
            loops: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start a loop at `pos`, stopping any loop already running there.
    pub fn create(&mut self, pos: &Position, id: RecordId) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some((_, previous)) = self.loops.remove(pos) {
            if let Err(err) = self.world.stop_effect(previous) {
                log::warn!("failed to stop replaced effect at {}: {}", pos, err);
            }
        }
        let handle = self
            .world
            .start_effect(pos, &self.spec, id)
            .map_err(|e| GraveError::Presenter(format!("effect at {} for {}: {}", pos, id, e)))?;
        self.loops.insert(pos.clone(), (id, handle));
        Ok(())
    }

    /// Stop the loop at `pos`. The entry is forgotten even if stopping fails.
    pub fn remove(&mut self, pos: &Position) -> Result<bool> {
        let Some((id, handle)) = self.loops.remove(pos) else {
            return Ok(false);
        };
        self.world
            .stop_effect(handle)
            .map_err(|e| GraveError::Presenter(format!("effect at {} for {}: {}", pos, id, e)))
    }

    pub fn has(&self, pos: &Position) -> bool {
        self.loops.contains_key(pos)
    }

    pub fn count(&self) -> usize {
        self.loops.len()
    }

    pub fn shutdown(&mut self) -> usize {
        let mut stopped = 0;
        for (pos, (_, handle)) in self.loops.drain() {
            match self.world.stop_effect(handle) {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(err) => log::warn!("failed to stop effect at {}: {}", pos, err),
            }
        }
        stopped
    }
}
