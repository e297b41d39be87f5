//! In-memory state of one active tombstone.
//!
//! Pure data plus time-dependent queries; every query takes `now` so the
//! answer is evaluated at call time rather than cached at creation.

use crate::core::{Millis, OwnerId, Position, RecordId, TombstoneRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneInstance {
    record_id: RecordId,
    owner: OwnerId,
    position: Position,
    death_time: Millis,
    protection_expire: Millis,
    despawn_time: Millis,
    experience: u32,
    has_marker: bool,
    has_label: bool,
    has_effect: bool,
    removed: bool,
}

impl TombstoneInstance {
    pub fn from_record(record: &TombstoneRecord) -> Self {
        Self {
            record_id: record.id,
            owner: record.owner,
            position: record.position.clone(),
            death_time: record.death_time,
            protection_expire: record.protection_expire,
            despawn_time: record.despawn_time,
            experience: record.experience,
            has_marker: false,
            has_label: false,
            has_effect: false,
            removed: false,
        }
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn death_time(&self) -> Millis {
        self.death_time
    }

    pub fn protection_expire(&self) -> Millis {
        self.protection_expire
    }

    pub fn despawn_time(&self) -> Millis {
        self.despawn_time
    }

    pub fn experience(&self) -> u32 {
        self.experience
    }

    /// Lower the mirrored experience. Values above the current one are ignored.
    pub fn set_experience(&mut self, experience: u32) {
        self.experience = self.experience.min(experience);
    }

    pub fn has_marker(&self) -> bool {
        self.has_marker
    }

    pub fn has_label(&self) -> bool {
        self.has_label
    }

    pub fn has_effect(&self) -> bool {
        self.has_effect
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn set_marker(&mut self, present: bool) {
        if !self.removed {
            self.has_marker = present;
        }
    }

    pub fn set_label(&mut self, present: bool) {
        if !self.removed {
            self.has_label = present;
        }
    }

    pub fn set_effect(&mut self, present: bool) {
        if !self.removed {
            self.has_effect = present;
        }
    }

    /// Protected while `now <= protection_expire`.
    pub fn is_protection_expired(&self, now: Millis) -> bool {
        now > self.protection_expire
    }

    pub fn remaining_protection(&self, now: Millis) -> Millis {
        (self.protection_expire - now).max(0)
    }

    pub fn should_despawn(&self, now: Millis) -> bool {
        now > self.despawn_time
    }

    pub fn is_complete(&self) -> bool {
        self.has_marker && !self.removed
    }

    /// Terminal; clears every presence flag. Idempotent.
    pub fn mark_removed(&mut self) {
        self.removed = true;
        self.has_marker = false;
        self.has_label = false;
        self.has_effect = false;
    }

    pub fn is_owner(&self, accessor: OwnerId) -> bool {
        self.owner == accessor
    }

    /// Owner and admins always; anyone once protection has lapsed.
    pub fn can_access(&self, accessor: OwnerId, is_admin: bool, now: Millis) -> bool {
        is_admin || self.is_owner(accessor) || self.is_protection_expired(now)
    }

    pub fn existence_time(&self, now: Millis) -> Millis {
        (now - self.death_time).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> TombstoneInstance {
        TombstoneInstance::from_record(&TombstoneRecord {
            id: RecordId(1),
            owner: OwnerId::new_v4(),
            position: Position::new("world", 0, 64, 0),
            death_time: 1_000,
            protection_expire: 1_000 + 3_600_000,
            despawn_time: 1_000 + 86_400_000,
            experience: 50,
        })
    }

    #[test]
    fn test_protection_boundary() {
        let tombstone = instance();
        let stranger = OwnerId::new_v4();
        let expire = tombstone.protection_expire();

        assert!(!tombstone.can_access(stranger, false, expire - 1));
        assert!(!tombstone.can_access(stranger, false, expire));
        assert!(tombstone.can_access(stranger, false, expire + 1));

        assert!(tombstone.can_access(tombstone.owner(), false, expire - 1));
        assert!(tombstone.can_access(stranger, true, expire - 1));

        assert_eq!(tombstone.remaining_protection(expire - 1), 1);
        assert_eq!(tombstone.remaining_protection(expire + 10), 0);
    }

    #[test]
    fn test_despawn_uses_own_time() {
        let tombstone = instance();
        assert!(!tombstone.should_despawn(tombstone.despawn_time()));
        assert!(tombstone.should_despawn(tombstone.despawn_time() + 1));
    }

    #[test]
    fn test_complete_requires_marker() {
        let mut tombstone = instance();
        assert!(!tombstone.is_complete());
        tombstone.set_marker(true);
        tombstone.set_label(true);
        assert!(tombstone.is_complete());

        tombstone.mark_removed();
        tombstone.mark_removed();
        assert!(!tombstone.is_complete());
        assert!(!tombstone.has_label());

        tombstone.set_marker(true);
        assert!(!tombstone.has_marker());
    }

    #[test]
    fn test_experience_never_increases() {
        let mut tombstone = instance();
        tombstone.set_experience(80);
        assert_eq!(tombstone.experience(), 50);
        tombstone.set_experience(0);
        assert_eq!(tombstone.experience(), 0);
        tombstone.set_experience(10);
        assert_eq!(tombstone.experience(), 0);
    }

    #[test]
    fn test_existence_time() {
        let tombstone = instance();
        assert_eq!(tombstone.existence_time(1_500), 500);
        assert_eq!(tombstone.existence_time(0), 0);
    }
}
