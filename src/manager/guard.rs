//! Block event decisions for marker cells. The host cancels or edits its
//! events based on these answers; nothing here touches the world.

use super::TombstoneManager;
use crate::core::{OwnerId, Position};
use crate::outcome::BreakDecision;
use crate::storage::TombstoneStore;
use crate::world::World;

impl<S: TombstoneStore + 'static, W: World + 'static> TombstoneManager<S, W> {
    /// Decide a player's attempt to break the block at `pos`.
    ///
    /// The marker's tag identifies the tombstone. With skull protection on
    /// for the world nobody may break it; otherwise anyone allowed to open
    /// it may.
    pub fn check_break(&self, pos: &Position, accessor: OwnerId, is_admin: bool) -> BreakDecision {
        let Some(id) = self.tombstone_id_at(pos) else {
            return BreakDecision::NotTombstone;
        };
        let Some(instance) = self.get_by_id(id) else {
            return BreakDecision::NotTombstone;
        };

        if self.config.skull_protection.is_enabled(&pos.world) {
            return BreakDecision::SkullProtected {
                record_id: id,
                admin_hint: is_admin,
            };
        }
        let now = self.now();
        if !instance.can_access(accessor, is_admin, now) {
            return BreakDecision::Protected {
                remaining_ms: instance.remaining_protection(now),
            };
        }
        BreakDecision::Allowed {
            owner: instance.is_owner(accessor),
        }
    }

    /// Whether a block may be placed into `pos`. Only admins may build
    /// into an active tombstone cell.
    pub fn check_place(&self, pos: &Position, is_admin: bool) -> bool {
        is_admin || !self.is_guarded(pos)
    }

    /// Drop tombstone cells from an explosion's block list in worlds with
    /// skull protection.
    pub fn filter_explosion(&self, blocks: &mut Vec<Position>) {
        blocks.retain(|pos| {
            !(self.is_guarded(pos) && self.config.skull_protection.is_enabled(&pos.world))
        });
    }

    /// Whether environmental changes (burning, fading, pistons, physics,
    /// growth) must leave `pos` alone.
    pub fn is_guarded(&self, pos: &Position) -> bool {
        self.instances.contains_key(pos)
    }
}
