// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Every mutation made inside a store transaction records how to undo itself.
// Rollback replays the log in reverse; commit simply discards it.
//
// ============================================================================

use crate::core::{ItemEntry, RecordId, TombstoneRecord};

/// A single reversible change in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A record was inserted; undo removes it.
    InsertRecord { id: RecordId },

    /// A record and its items were removed; undo restores both.
    DeleteRecord {
        record: TombstoneRecord,
        items: Vec<ItemEntry>,
    },

    /// An item row was inserted; undo removes that slot again.
    InsertItem { id: RecordId, slot_index: u32 },

    /// An item row was removed; undo puts it back.
    DeleteItem { id: RecordId, entry: ItemEntry },

    /// Experience was overwritten; undo restores `previous`.
    SetExperience { id: RecordId, previous: u32 },
}

impl Change {
    /// Record affected by this change
    pub fn record_id(&self) -> RecordId {
        match self {
            Change::InsertRecord { id } => *id,
            Change::DeleteRecord { record, .. } => record.id,
            Change::InsertItem { id, .. } => *id,
            Change::DeleteItem { id, .. } => *id,
            Change::SetExperience { id, .. } => *id,
        }
    }

    /// Whether the change touches the record row itself rather than its items
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            Change::InsertRecord { .. } | Change::DeleteRecord { .. } | Change::SetExperience { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OwnerId, Position};

    #[test]
    fn test_change_record_id() {
        let record = TombstoneRecord {
            id: RecordId(7),
            owner: OwnerId::new_v4(),
            position: Position::new("world", 0, 64, 0),
            death_time: 1,
            protection_expire: 2,
            despawn_time: 3,
            experience: 10,
        };
        let changes = vec![
            Change::InsertRecord { id: RecordId(7) },
            Change::DeleteRecord {
                record,
                items: Vec::new(),
            },
            Change::InsertItem {
                id: RecordId(7),
                slot_index: 3,
            },
            Change::DeleteItem {
                id: RecordId(7),
                entry: ItemEntry::new(3, vec![1]),
            },
            Change::SetExperience {
                id: RecordId(7),
                previous: 10,
            },
        ];
        assert!(changes.iter().all(|c| c.record_id() == RecordId(7)));
    }

    #[test]
    fn test_record_level_classification() {
        assert!(Change::InsertRecord { id: RecordId(1) }.is_record_level());
        assert!(
            Change::SetExperience {
                id: RecordId(1),
                previous: 0
            }
            .is_record_level()
        );
        assert!(
            !Change::InsertItem {
                id: RecordId(1),
                slot_index: 0
            }
            .is_record_level()
        );
    }
}
