//! In-memory tombstone tables used by the file-backed store

use super::persistence::WalEntry;
use crate::core::{GraveError, ItemEntry, OwnerId, RecordId, Result, TombstoneRecord};
use crate::transaction::Change;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rows of both tables. Item rows are kept sorted by origin slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    next_id: i64,
    records: BTreeMap<RecordId, TombstoneRecord>,
    items: BTreeMap<RecordId, Vec<ItemEntry>>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next auto-increment id. Ids are never reused, even after rollback.
    pub fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId(self.next_id)
    }

    pub fn insert_record(&mut self, record: TombstoneRecord) -> Result<()> {
        if self.records.contains_key(&record.id) {
            return Err(GraveError::Storage(format!(
                "duplicate tombstone id {}",
                record.id
            )));
        }
        self.next_id = self.next_id.max(record.id.0);
        self.items.entry(record.id).or_default();
        self.records.insert(record.id, record);
        Ok(())
    }

    /// Remove a record and cascade its items.
    pub fn remove_record(&mut self, id: RecordId) -> Option<(TombstoneRecord, Vec<ItemEntry>)> {
        let record = self.records.remove(&id)?;
        let items = self.items.remove(&id).unwrap_or_default();
        Some((record, items))
    }

    pub fn insert_item(&mut self, id: RecordId, entry: ItemEntry) -> Result<()> {
        if !self.records.contains_key(&id) {
            return Err(GraveError::Storage(format!(
                "item references missing tombstone {}",
                id
            )));
        }
        let rows = self.items.entry(id).or_default();
        match rows.binary_search_by_key(&entry.slot_index, |row| row.slot_index) {
            Ok(_) => Err(GraveError::Storage(format!(
                "slot {} already stored for tombstone {}",
                entry.slot_index, id
            ))),
            Err(at) => {
                rows.insert(at, entry);
                Ok(())
            }
        }
    }

    pub fn remove_item(&mut self, id: RecordId, slot_index: u32) -> Option<ItemEntry> {
        let rows = self.items.get_mut(&id)?;
        let at = rows
            .binary_search_by_key(&slot_index, |row| row.slot_index)
            .ok()?;
        Some(rows.remove(at))
    }

    /// Overwrite experience, returning the previous value.
    pub fn set_experience(&mut self, id: RecordId, experience: u32) -> Option<u32> {
        let record = self.records.get_mut(&id)?;
        Some(std::mem::replace(&mut record.experience, experience))
    }

    pub fn record(&self, id: RecordId) -> Option<&TombstoneRecord> {
        self.records.get(&id)
    }

    pub fn items(&self, id: RecordId) -> &[ItemEntry] {
        self.items.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn records(&self) -> impl Iterator<Item = &TombstoneRecord> {
        self.records.values()
    }

    /// Records of one owner, newest first.
    pub fn by_owner(&self, owner: OwnerId) -> Vec<TombstoneRecord> {
        let mut rows: Vec<TombstoneRecord> = self
            .records
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        sort_newest_first(&mut rows);
        rows
    }

    /// All records, newest first.
    pub fn all(&self) -> Vec<TombstoneRecord> {
        let mut rows: Vec<TombstoneRecord> = self.records.values().cloned().collect();
        sort_newest_first(&mut rows);
        rows
    }

    /// Ids whose own despawn time lies strictly before `now`.
    pub fn expired(&self, now: i64) -> Vec<RecordId> {
        self.records
            .values()
            .filter(|r| r.despawn_time < now)
            .map(|r| r.id)
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    /// Reverse one change recorded by a transaction.
    pub fn undo(&mut self, change: Change) {
        match change {
            Change::InsertRecord { id } => {
                self.remove_record(id);
            }
            Change::DeleteRecord { record, items } => {
                let id = record.id;
                self.records.insert(id, record);
                self.items.insert(id, items);
            }
            Change::InsertItem { id, slot_index } => {
                self.remove_item(id, slot_index);
            }
            Change::DeleteItem { id, entry } => {
                if let Err(err) = self.insert_item(id, entry) {
                    log::error!("undo of item delete failed: {}", err);
                }
            }
            Change::SetExperience { id, previous } => {
                self.set_experience(id, previous);
            }
        }
    }

    /// Replay a committed WAL entry during recovery.
    pub fn apply(&mut self, entry: WalEntry) -> Result<()> {
        match entry {
            WalEntry::InsertRecord(record) => self.insert_record(record),
            WalEntry::InsertItem { id, entry } => self.insert_item(id, entry),
            WalEntry::DeleteRecord(id) => {
                self.remove_record(id);
                Ok(())
            }
            WalEntry::DeleteItem { id, slot_index } => {
                self.remove_item(id, slot_index);
                Ok(())
            }
            WalEntry::SetExperience { id, experience } => {
                self.set_experience(id, experience);
                Ok(())
            }
            WalEntry::Begin(_) | WalEntry::Commit(_) => Ok(()),
        }
    }
}

fn sort_newest_first(rows: &mut [TombstoneRecord]) {
    rows.sort_by(|a, b| b.death_time.cmp(&a.death_time).then(b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;

    fn record(tables: &mut Tables, owner: OwnerId, death_time: i64) -> RecordId {
        let id = tables.allocate_id();
        tables
            .insert_record(TombstoneRecord {
                id,
                owner,
                position: Position::new("world", 0, 64, 0),
                death_time,
                protection_expire: death_time + 10,
                despawn_time: death_time + 100,
                experience: 5,
            })
            .unwrap();
        id
    }

    #[test]
    fn test_items_sorted_and_unique_per_slot() {
        let mut tables = Tables::new();
        let id = record(&mut tables, OwnerId::new_v4(), 1);
        tables.insert_item(id, ItemEntry::new(9, vec![9])).unwrap();
        tables.insert_item(id, ItemEntry::new(2, vec![2])).unwrap();
        tables.insert_item(id, ItemEntry::new(5, vec![5])).unwrap();
        assert!(tables.insert_item(id, ItemEntry::new(5, vec![0])).is_err());

        let slots: Vec<u32> = tables.items(id).iter().map(|e| e.slot_index).collect();
        assert_eq!(slots, vec![2, 5, 9]);
    }

    #[test]
    fn test_item_requires_record() {
        let mut tables = Tables::new();
        assert!(tables.insert_item(RecordId(3), ItemEntry::new(0, vec![])).is_err());
    }

    #[test]
    fn test_remove_record_cascades_items() {
        let mut tables = Tables::new();
        let id = record(&mut tables, OwnerId::new_v4(), 1);
        tables.insert_item(id, ItemEntry::new(1, vec![1])).unwrap();
        let (_, items) = tables.remove_record(id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(tables.item_count(), 0);
        assert!(tables.remove_record(id).is_none());
    }

    #[test]
    fn test_by_owner_newest_first() {
        let mut tables = Tables::new();
        let owner = OwnerId::new_v4();
        let old = record(&mut tables, owner, 100);
        let new = record(&mut tables, owner, 300);
        record(&mut tables, OwnerId::new_v4(), 200);

        let ids: Vec<RecordId> = tables.by_owner(owner).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![new, old]);
        assert_eq!(tables.all().len(), 3);
    }

    #[test]
    fn test_expired_uses_despawn_time() {
        let mut tables = Tables::new();
        let id = record(&mut tables, OwnerId::new_v4(), 0);
        assert!(tables.expired(100).is_empty());
        assert_eq!(tables.expired(101), vec![id]);
    }

    #[test]
    fn test_undo_restores_deleted_record() {
        let mut tables = Tables::new();
        let id = record(&mut tables, OwnerId::new_v4(), 1);
        tables.insert_item(id, ItemEntry::new(4, vec![4])).unwrap();
        let before = tables.clone();

        let (record, items) = tables.remove_record(id).unwrap();
        tables.undo(Change::DeleteRecord { record, items });
        assert_eq!(tables, before);
    }

    #[test]
    fn test_ids_not_reused_after_undo() {
        let mut tables = Tables::new();
        let id = record(&mut tables, OwnerId::new_v4(), 1);
        tables.undo(Change::InsertRecord { id });
        assert_eq!(tables.allocate_id(), RecordId(id.0 + 1));
    }
}
