use super::{TeardownMode, TombstoneManager};
use crate::codec::{self, ItemStack};
use crate::core::{NewTombstone, OwnerId, Position, RecordId, Result, TombstoneRecord};
use crate::instance::TombstoneInstance;
use crate::outcome::CreateOutcome;
use crate::policy::Durations;
use crate::storage::TombstoneStore;
use crate::world::World;

/// Everything known about a death at the moment it happens
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub owner: OwnerId,
    pub position: Position,
    /// Full inventory; `None` and empty stacks are skipped, indices kept
    pub slots: Vec<Option<ItemStack>>,
    pub experience: u32,
    /// Overrides config defaults, usually from [`Durations::resolve`]
    pub durations: Option<Durations>,
}

impl CreateRequest {
    pub fn new(owner: OwnerId, position: Position) -> Self {
        Self {
            owner,
            position,
            slots: Vec::new(),
            experience: 0,
            durations: None,
        }
    }

    pub fn slots(mut self, slots: Vec<Option<ItemStack>>) -> Self {
        self.slots = slots;
        self
    }

    pub fn experience(mut self, experience: u32) -> Self {
        self.experience = experience;
        self
    }

    pub fn durations(mut self, durations: Durations) -> Self {
        self.durations = Some(durations);
        self
    }
}

impl<S: TombstoneStore + 'static, W: World + 'static> TombstoneManager<S, W> {
    /// Persist a death and materialize it in the world.
    ///
    /// Order: encode items, pick a free cell, make room under the per-owner
    /// limit, save, then place marker, label and effect. Nothing is evicted
    /// unless a cell was found, and the record is durable before anything
    /// appears in the world. A failed presentation step only clears its flag.
    pub async fn create_tombstone(&mut self, request: CreateRequest) -> CreateOutcome {
        let CreateRequest {
            owner,
            position,
            slots,
            experience,
            durations,
        } = request;

        let entries = match codec::collect_slots(&slots) {
            Ok(entries) => entries,
            Err(err) => {
                log::error!("cannot encode items of {} dying at {}: {}", owner, position, err);
                return CreateOutcome::CreationFailed;
            }
        };

        let resolved = match self.resolve_position(&position) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                log::info!(
                    "no free cell for {} within {} of {}",
                    owner,
                    self.config.search_radius,
                    position
                );
                return CreateOutcome::NoSpace;
            }
            Err(err) => {
                log::error!("position search around {} failed: {}", position, err);
                return CreateOutcome::CreationFailed;
            }
        };

        let existing = match self.store.list_by_owner(owner).await {
            Ok(records) => records,
            Err(err) => {
                log::error!("cannot count tombstones of {}: {}", owner, err);
                return CreateOutcome::CreationFailed;
            }
        };
        let max = self.config.max_tombstones;
        let mut evicted = Vec::new();
        if existing.len() >= max {
            let mut oldest_first = existing.clone();
            oldest_first.sort_by_key(|r| (r.death_time, r.id));
            let excess = existing.len() + 1 - max;
            for record in oldest_first.into_iter().take(excess) {
                if !self.evict(&record).await {
                    log::warn!("could not evict tombstone {} of {}", record.id, owner);
                    return CreateOutcome::LimitReached {
                        max,
                        current: existing.len() - evicted.len(),
                    };
                }
                evicted.push(record.id);
            }
        }

        let durations = durations
            .unwrap_or_else(|| Durations::from_config(&self.config))
            .clamped();
        let now = self.now();
        let tombstone = NewTombstone {
            owner,
            position: resolved.clone(),
            death_time: now,
            protection_expire: now + durations.protection_ms,
            despawn_time: now + durations.despawn_ms,
            experience,
        };
        let id = match self.store.save(tombstone.clone(), entries).await {
            Ok(id) => id,
            Err(err) => {
                log::error!("failed to save tombstone of {} at {}: {}", owner, resolved, err);
                return CreateOutcome::CreationFailed;
            }
        };

        let mut instance = TombstoneInstance::from_record(&tombstone.with_id(id));
        self.materialize(&mut instance, now);
        if !instance.is_complete() {
            log::warn!(
                "tombstone {} at {} is incomplete (marker {}, label {}, effect {})",
                id,
                resolved,
                instance.has_marker(),
                instance.has_label(),
                instance.has_effect()
            );
        }
        let snapshot = instance.clone();
        self.register(instance);
        log::info!("created tombstone {} for {} at {}", id, owner, resolved);

        CreateOutcome::Created {
            instance: snapshot,
            evicted,
        }
    }

    /// The requested cell if free, else the first free cell of the
    /// neighbourhood scanned layer by layer upwards, then along x and z.
    fn resolve_position(&self, requested: &Position) -> Result<Option<Position>> {
        if self.is_free(requested)? {
            return Ok(Some(requested.clone()));
        }
        let radius = self.config.search_radius;
        for dy in 0..=radius {
            for dx in -radius..=radius {
                for dz in -radius..=radius {
                    let candidate = requested.offset(dx, dy, dz);
                    if self.is_free(&candidate)? {
                        return Ok(Some(candidate));
                    }
                }
            }
        }
        Ok(None)
    }

    fn is_free(&self, pos: &Position) -> Result<bool> {
        if self.instances.contains_key(pos) {
            return Ok(false);
        }
        Ok(self.world.block_at(pos)?.is_placeable())
    }

    /// Remove one record to make room. The durable record goes first; the
    /// instance and its artifacts are only torn down once the store confirms,
    /// so a failed eviction leaves the tombstone fully intact.
    async fn evict(&mut self, record: &TombstoneRecord) -> bool {
        if let Err(err) = self.store.delete(record.id).await {
            log::error!(
                "failed to evict tombstone {} of {}: {}",
                record.id,
                record.owner,
                err
            );
            return false;
        }

        if let Some(pos) = self.by_id.get(&record.id).cloned() {
            self.teardown(&pos, TeardownMode::MemoryOnly).await;
            log::info!("evicted tombstone {} of {} at {}", record.id, record.owner, pos);
        } else {
            // Dormant record, e.g. in an unloaded world
            self.sweeper.cleanup_by_record_id(record.id, None);
            self.clear_marker_if_tagged(&record.position, record.id);
            log::info!("evicted dormant tombstone {} of {}", record.id, record.owner);
        }
        true
    }

    /// Clear the block at `pos` only if it is the marker of `id`.
    pub(super) fn clear_marker_if_tagged(&self, pos: &Position, id: RecordId) -> bool {
        match self.world.marker_tag(pos) {
            Ok(Some(tag)) if tag == id => match self.world.clear_block(pos) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("failed to clear marker of {} at {}: {}", id, pos, err);
                    false
                }
            },
            Ok(_) => true,
            Err(err) => {
                log::debug!("marker probe of {} at {} failed: {}", id, pos, err);
                false
            }
        }
    }
}
