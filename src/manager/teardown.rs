use super::TombstoneManager;
use crate::core::{Position, RecordId};
use crate::instance::TombstoneInstance;
use crate::storage::TombstoneStore;
use crate::world::World;

/// How far a teardown reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownMode {
    /// World artifacts, memory and the durable record
    Full,
    /// World artifacts and memory; the record is already gone
    MemoryOnly,
}

pub(crate) struct Teardown {
    /// No step reported an error
    pub clean: bool,
    pub instance: TombstoneInstance,
}

impl<S: TombstoneStore + 'static, W: World + 'static> TombstoneManager<S, W> {
    /// Tear down the tombstone at `pos`.
    ///
    /// Returns `true` when every step succeeded, `false` when there was
    /// nothing to remove or a step failed. With no instance at `pos` the
    /// surroundings are still swept for orphans.
    pub async fn remove_at(&mut self, pos: &Position) -> bool {
        match self.teardown(pos, TeardownMode::Full).await {
            Some(teardown) => teardown.clean,
            None => {
                self.cleanup_around(pos);
                false
            }
        }
    }

    /// Tear down the tombstone a previously handed out instance refers to.
    /// A stale instance whose cell now holds another tombstone is ignored.
    pub async fn remove_instance(&mut self, instance: &TombstoneInstance) -> bool {
        let current = self
            .instances
            .get(instance.position())
            .map(TombstoneInstance::record_id);
        if current != Some(instance.record_id()) {
            return false;
        }
        self.remove_at(instance.position()).await
    }

    /// Tear down by record id, including records that were never
    /// materialized in this run.
    pub async fn remove_by_id(&mut self, id: RecordId) -> bool {
        if let Some(pos) = self.by_id.get(&id).cloned() {
            return self.remove_at(&pos).await;
        }

        let record = match self.store.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(err) => {
                log::error!("failed to look up tombstone {}: {}", id, err);
                return false;
            }
        };
        match self.store.delete(id).await {
            Ok(deleted) => {
                let swept = self.sweeper.cleanup_by_record_id(id, None);
                let marker = self.clear_marker_if_tagged(&record.position, id);
                deleted && marker && swept.failed_regions == 0
            }
            Err(err) => {
                log::error!("failed to delete tombstone {}: {}", id, err);
                false
            }
        }
    }

    /// The one teardown path. Steps run in a fixed order and every step
    /// runs even if an earlier one failed:
    /// forget, label, leftover sweep, effect, marker, record, mark removed.
    pub(crate) async fn teardown(
        &mut self,
        pos: &Position,
        mode: TeardownMode,
    ) -> Option<Teardown> {
        let mut instance = self.instances.remove(pos)?;
        let id = instance.record_id();
        self.by_id.remove(&id);
        let mut clean = true;

        if let Err(err) = self.labels.remove(pos, id) {
            log::warn!("{}", err);
            clean = false;
        }
        let swept = self.sweeper.cleanup_by_record_id(id, Some(&pos.world));
        if swept.failed_regions > 0 {
            clean = false;
        }
        if let Err(err) = self.effects.remove(pos) {
            log::warn!("{}", err);
            clean = false;
        }
        if !self.clear_marker_if_tagged(pos, id) {
            clean = false;
        }

        if mode == TeardownMode::Full {
            if let Err(err) = self.store.delete(id).await {
                log::error!(
                    "failed to delete tombstone {} of {} at {}: {}",
                    id,
                    instance.owner(),
                    pos,
                    err
                );
                clean = false;
            }
        }

        instance.mark_removed();
        log::debug!("tore down tombstone {} at {} ({:?}, clean: {})", id, pos, mode, clean);
        Some(Teardown { clean, instance })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::CreateRequest;
    use super::*;
    use crate::codec::ItemStack;
    use crate::core::OwnerId;
    use crate::policy::MarkerKind;

    async fn create(h: &mut Harness, pos: &Position) -> TombstoneInstance {
        h.manager
            .create_tombstone(
                CreateRequest::new(OwnerId::new_v4(), pos.clone())
                    .slots(vec![Some(ItemStack::new("stone", 1))])
                    .experience(5),
            )
            .await
            .instance()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut h = harness().await;
        let pos = Position::new(WORLD, 0, 64, 0);
        let instance = create(&mut h, &pos).await;

        assert!(h.manager.remove_at(&pos).await);
        assert!(!h.manager.remove_at(&pos).await);
        assert!(h.store.get(instance.record_id()).await.unwrap().is_none());
        assert_eq!(h.world.marker_count(), 0);
        assert_eq!(h.world.label_count(), 0);
        assert_eq!(h.world.effect_count(), 0);
        assert!(h.manager.get_by_id(instance.record_id()).is_none());
    }

    #[tokio::test]
    async fn test_stale_instance_is_ignored() {
        let mut h = harness().await;
        let pos = Position::new(WORLD, 0, 64, 0);
        let old = create(&mut h, &pos).await;
        assert!(h.manager.remove_instance(&old).await);
        let replacement = create(&mut h, &pos).await;

        assert!(!h.manager.remove_instance(&old).await);
        assert!(h.manager.get(&pos).is_some());
        assert!(h.manager.remove_instance(&replacement).await);
    }

    #[tokio::test]
    async fn test_foreign_marker_is_left_alone() {
        let mut h = harness().await;
        let pos = Position::new(WORLD, 0, 64, 0);
        create(&mut h, &pos).await;
        h.world.retag(&pos, Some(RecordId(4242)));

        assert!(h.manager.remove_at(&pos).await);
        assert_eq!(h.world.marker_tag(&pos).unwrap(), Some(RecordId(4242)));
    }

    #[tokio::test]
    async fn test_failed_step_reports_but_finishes() {
        let mut h = harness().await;
        let pos = Position::new(WORLD, 0, 64, 0);
        let instance = create(&mut h, &pos).await;
        h.world.inject(|f| f.label_removal = true);

        assert!(!h.manager.remove_at(&pos).await);
        assert!(h.manager.get(&pos).is_none());
        assert!(h.store.get(instance.record_id()).await.unwrap().is_none());
        assert_eq!(h.world.marker_count(), 0);
        assert_eq!(h.world.effect_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_by_id_handles_dormant_records() {
        let mut h = harness().await;
        let pos = Position::new(WORLD, 0, 64, 0);
        let instance = create(&mut h, &pos).await;
        let id = instance.record_id();

        // Drop the in-memory side only, as if the world had been unloaded
        h.manager.teardown(&pos, TeardownMode::MemoryOnly).await;
        h.world.place_marker(&pos, MarkerKind::Chest, id).unwrap();
        assert!(h.store.get(id).await.unwrap().is_some());

        assert!(h.manager.remove_by_id(id).await);
        assert!(h.store.get(id).await.unwrap().is_none());
        assert_eq!(h.world.marker_tag(&pos).unwrap(), None);
        assert!(!h.manager.remove_by_id(id).await);
    }

    #[tokio::test]
    async fn test_remove_at_empty_cell_sweeps_orphans() {
        let mut h = harness().await;
        let pos = Position::new(WORLD, 0, 64, 0);
        h.world
            .place_marker(&pos.offset(1, 0, 0), MarkerKind::Chest, RecordId(77))
            .unwrap();
        h.world.spawn_stray_label(&pos, RecordId(77));

        assert!(!h.manager.remove_at(&pos).await);
        assert_eq!(h.world.marker_count(), 0);
        assert_eq!(h.world.label_count(), 0);
    }
}
