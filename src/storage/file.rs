// ============================================================================
// File-backed Tombstone Store
// ============================================================================
//
// In-memory tables guarded by a tokio RwLock, made durable through a
// write-ahead log plus periodic snapshots. Every mutation runs inside a
// `Transaction`; on failure its undo log is replayed before the error is
// returned, so callers never observe a half-applied save or delete.
//
// ============================================================================

use super::naming::TableNames;
use super::persistence::{DurabilityMode, PersistenceManager, WalEntry};
use super::tables::Tables;
use super::TombstoneStore;
use crate::core::{
    GraveError, ItemEntry, Millis, NewTombstone, OwnerId, RecordId, Result, TombstoneRecord,
};
use crate::transaction::{Change, Transaction};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// File store configuration
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Directory holding `<prefix>tombstones.wal` and `.snapshot`
    pub data_dir: PathBuf,

    pub durability: DurabilityMode,

    /// Table prefix; empty by default for the file backend
    pub table_prefix: String,

    /// WAL entries between automatic checkpoints
    pub checkpoint_threshold: usize,
}

impl FileStoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            durability: DurabilityMode::Async,
            table_prefix: String::new(),
            checkpoint_threshold: 1000,
        }
    }

    /// Memory-only store; nothing is written to disk.
    pub fn memory() -> Self {
        Self::new(".").durability(DurabilityMode::None)
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = prefix.to_string();
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        TableNames::validate(&self.table_prefix)?;
        if self.checkpoint_threshold == 0 {
            return Err("checkpoint_threshold must be > 0".to_string());
        }
        Ok(())
    }
}

/// Counters reported by the admin tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub records: usize,
    pub items: usize,
    pub wal_entries: usize,
}

/// Mutations available inside a store transaction
pub struct TxContext<'a> {
    tables: &'a mut Tables,
    txn: &'a mut Transaction,
}

impl TxContext<'_> {
    pub fn insert_record(&mut self, tombstone: NewTombstone) -> Result<RecordId> {
        let id = self.tables.allocate_id();
        let record = tombstone.with_id(id);
        self.tables.insert_record(record.clone())?;
        self.txn
            .record(Change::InsertRecord { id }, WalEntry::InsertRecord(record))?;
        Ok(id)
    }

    pub fn insert_item(&mut self, id: RecordId, entry: ItemEntry) -> Result<()> {
        let slot_index = entry.slot_index;
        self.tables.insert_item(id, entry.clone())?;
        self.txn.record(
            Change::InsertItem { id, slot_index },
            WalEntry::InsertItem { id, entry },
        )
    }

    pub fn delete_record(&mut self, id: RecordId) -> Result<bool> {
        let Some((record, items)) = self.tables.remove_record(id) else {
            return Ok(false);
        };
        self.txn
            .record(Change::DeleteRecord { record, items }, WalEntry::DeleteRecord(id))?;
        Ok(true)
    }

    pub fn remove_item(&mut self, id: RecordId, slot_index: u32) -> Result<bool> {
        let Some(entry) = self.tables.remove_item(id, slot_index) else {
            return Ok(false);
        };
        self.txn.record(
            Change::DeleteItem { id, entry },
            WalEntry::DeleteItem { id, slot_index },
        )?;
        Ok(true)
    }

    pub fn set_experience(&mut self, id: RecordId, experience: u32) -> Result<bool> {
        let Some(previous) = self.tables.set_experience(id, experience) else {
            return Ok(false);
        };
        self.txn.record(
            Change::SetExperience { id, previous },
            WalEntry::SetExperience { id, experience },
        )?;
        Ok(true)
    }

    pub fn tables(&self) -> &Tables {
        self.tables
    }
}

struct Inner {
    tables: Tables,
    persistence: Option<PersistenceManager>,
    open: bool,
}

impl Inner {
    fn is_healthy(&self) -> bool {
        self.persistence
            .as_ref()
            .is_some_and(PersistenceManager::is_healthy)
    }

    fn run<T, F>(&mut self, f: &F) -> Result<T>
    where
        F: Fn(&mut TxContext<'_>) -> Result<T>,
    {
        let mut txn = Transaction::new();
        let outcome = f(&mut TxContext {
            tables: &mut self.tables,
            txn: &mut txn,
        });
        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                self.rollback(&mut txn);
                return Err(err);
            }
        };

        if txn.is_read_only() {
            txn.commit()?;
            return Ok(value);
        }

        let logged = match self.persistence.as_mut() {
            Some(persistence) => persistence.log_commit(&txn.framed_redo()),
            None => Err(GraveError::Connection("store files are not open".to_string())),
        };
        if let Err(err) = logged {
            self.rollback(&mut txn);
            return Err(GraveError::Connection(format!("WAL append failed: {}", err)));
        }
        txn.commit()?;
        self.maybe_checkpoint();
        Ok(value)
    }

    fn rollback(&mut self, txn: &mut Transaction) {
        match txn.rollback() {
            Ok(changes) => {
                for change in changes {
                    self.tables.undo(change);
                }
            }
            Err(err) => log::error!("rollback of {} failed: {}", txn.id(), err),
        }
    }

    fn maybe_checkpoint(&mut self) {
        if let Some(persistence) = self.persistence.as_mut() {
            if persistence.needs_checkpoint() {
                if let Err(err) = persistence.checkpoint(&self.tables) {
                    log::warn!("tombstone store checkpoint failed: {}", err);
                }
            }
        }
    }
}

/// WAL + snapshot tombstone store
pub struct FileStore {
    config: FileStoreConfig,
    names: TableNames,
    inner: RwLock<Inner>,
}

impl FileStore {
    pub fn new(config: FileStoreConfig) -> Result<Self> {
        config.validate().map_err(GraveError::Config)?;
        let names = TableNames::new(&config.table_prefix);
        Ok(Self {
            config,
            names,
            inner: RwLock::new(Inner {
                tables: Tables::new(),
                persistence: None,
                open: false,
            }),
        })
    }

    pub fn open_dir<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Self::new(FileStoreConfig::new(data_dir))
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    fn open_persistence(&self) -> Result<PersistenceManager> {
        let mut persistence = PersistenceManager::new(
            &self.config.data_dir,
            &self.names.tombstones,
            self.config.durability,
        )?;
        persistence
            .wal_mut()
            .set_checkpoint_threshold(self.config.checkpoint_threshold);
        Ok(persistence)
    }

    /// Recreate the store files and checkpoint the current tables into them.
    /// The in-memory tables already hold every committed transaction.
    fn reopen(&self, inner: &mut Inner) -> Result<()> {
        inner.persistence = None;
        let mut persistence = self.open_persistence()?;
        persistence.checkpoint(&inner.tables)?;
        inner.persistence = Some(persistence);
        log::info!(
            "reopened tombstone store at {}",
            self.config.data_dir.display()
        );
        Ok(())
    }

    /// Health check with one reopen-and-retry around a write transaction.
    async fn write_txn<T, F>(&self, op: &str, f: F) -> Result<T>
    where
        F: Fn(&mut TxContext<'_>) -> Result<T> + Send + Sync,
        T: Send,
    {
        let mut inner = self.inner.write().await;
        if !inner.open {
            return Err(GraveError::Connection(format!("{}: store is not open", op)));
        }
        if !inner.is_healthy() {
            log::warn!("{}: tombstone store unhealthy, reopening", op);
            self.reopen(&mut inner)?;
        }
        match inner.run(&f) {
            Err(err) if err.is_connection() => {
                log::warn!("{} failed ({}), reopening and retrying once", op, err);
                self.reopen(&mut inner)?;
                inner.run(&f)
            }
            other => other,
        }
    }

    async fn read<T>(&self, op: &str, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let inner = self.inner.read().await;
        if !inner.open {
            return Err(GraveError::Connection(format!("{}: store is not open", op)));
        }
        Ok(f(&inner.tables))
    }

    /// Force a snapshot and truncate the WAL.
    pub async fn checkpoint(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Inner {
            tables,
            persistence,
            ..
        } = &mut *inner;
        match persistence.as_mut() {
            Some(persistence) => persistence.checkpoint(tables),
            None => Err(GraveError::Connection("store is not open".to_string())),
        }
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read().await;
        Ok(StoreStats {
            records: inner.tables.record_count(),
            items: inner.tables.item_count(),
            wal_entries: inner
                .persistence
                .as_ref()
                .map_or(0, |p| p.wal().entries_since_checkpoint()),
        })
    }
}

#[async_trait]
impl TombstoneStore for FileStore {
    async fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.open {
            return Ok(());
        }
        let persistence = self.open_persistence()?;
        inner.tables = persistence.recover()?;
        inner.persistence = Some(persistence);
        inner.open = true;
        log::info!(
            "tombstone store {} opened with {} records",
            self.names.tombstones,
            inner.tables.record_count()
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.open {
            return Ok(());
        }
        let Inner {
            tables,
            persistence,
            ..
        } = &mut *inner;
        if let Some(persistence) = persistence.as_mut() {
            if let Err(err) = persistence.checkpoint(tables) {
                log::warn!("final checkpoint of {} failed: {}", self.names.tombstones, err);
            }
        }
        inner.persistence = None;
        inner.tables = Tables::new();
        inner.open = false;
        Ok(())
    }

    async fn save(&self, tombstone: NewTombstone, items: Vec<ItemEntry>) -> Result<RecordId> {
        self.write_txn("save", |tx| {
            let id = tx.insert_record(tombstone.clone())?;
            for entry in &items {
                tx.insert_item(id, entry.clone())?;
            }
            Ok(id)
        })
        .await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        self.write_txn("delete", |tx| tx.delete_record(id)).await
    }

    async fn remove_item(&self, id: RecordId, slot_index: u32) -> Result<bool> {
        self.write_txn("remove_item", |tx| tx.remove_item(id, slot_index))
            .await
    }

    async fn zero_experience(&self, id: RecordId) -> Result<bool> {
        self.write_txn("zero_experience", |tx| tx.set_experience(id, 0))
            .await
    }

    async fn load_items(&self, id: RecordId) -> Result<Vec<ItemEntry>> {
        self.read("load_items", |tables| tables.items(id).to_vec())
            .await
    }

    async fn get(&self, id: RecordId) -> Result<Option<TombstoneRecord>> {
        self.read("get", |tables| tables.record(id).cloned()).await
    }

    async fn is_empty(&self, id: RecordId) -> Result<bool> {
        self.read("is_empty", |tables| {
            tables
                .record(id)
                .is_some_and(|r| r.experience == 0 && tables.items(id).is_empty())
        })
        .await
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<TombstoneRecord>> {
        self.read("list_by_owner", |tables| tables.by_owner(owner))
            .await
    }

    async fn list_all(&self) -> Result<Vec<TombstoneRecord>> {
        self.read("list_all", Tables::all).await
    }

    async fn delete_expired(&self, now: Millis) -> Result<Vec<RecordId>> {
        self.write_txn("delete_expired", |tx| {
            let expired = tx.tables().expired(now);
            for id in &expired {
                tx.delete_record(*id)?;
            }
            Ok(expired)
        })
        .await
    }

    async fn health_check(&self) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.open && inner.is_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;
    use tempfile::TempDir;

    fn new_tombstone(owner: OwnerId, death_time: Millis) -> NewTombstone {
        NewTombstone {
            owner,
            position: Position::new("world", 10, 64, 10),
            death_time,
            protection_expire: death_time + 3_600_000,
            despawn_time: death_time + 86_400_000,
            experience: 50,
        }
    }

    async fn open_store(dir: &TempDir) -> FileStore {
        let store = FileStore::new(
            FileStoreConfig::new(dir.path()).durability(DurabilityMode::Sync),
        )
        .unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_save_and_load_items_by_origin_slot() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let owner = OwnerId::new_v4();
        let items = vec![
            ItemEntry::new(2, vec![2]),
            ItemEntry::new(5, vec![5]),
            ItemEntry::new(9, vec![9]),
        ];
        let id = store.save(new_tombstone(owner, 1_000), items).await.unwrap();

        let slots: Vec<u32> = store
            .load_items(id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.slot_index)
            .collect();
        assert_eq!(slots, vec![2, 5, 9]);

        assert!(store.remove_item(id, 5).await.unwrap());
        let slots: Vec<u32> = store
            .load_items(id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.slot_index)
            .collect();
        assert_eq!(slots, vec![2, 9]);
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let duplicate = vec![ItemEntry::new(1, vec![1]), ItemEntry::new(1, vec![2])];
        let result = store
            .save(new_tombstone(OwnerId::new_v4(), 1), duplicate)
            .await;
        assert!(matches!(result, Err(GraveError::Storage(_))));
        assert!(store.list_all().await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().items, 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let id = store
            .save(new_tombstone(OwnerId::new_v4(), 1), vec![ItemEntry::new(0, vec![0])])
            .await
            .unwrap();
        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.load_items(id).await.unwrap().is_empty());
        assert!(!store.remove_item(id, 0).await.unwrap());
        assert!(!store.zero_experience(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_empty_after_withdrawal() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let id = store
            .save(new_tombstone(OwnerId::new_v4(), 1), vec![ItemEntry::new(3, vec![3])])
            .await
            .unwrap();
        assert!(!store.is_empty(id).await.unwrap());
        store.zero_experience(id).await.unwrap();
        assert!(!store.is_empty(id).await.unwrap());
        store.remove_item(id, 3).await.unwrap();
        assert!(store.is_empty(id).await.unwrap());
        assert!(!store.is_empty(RecordId(999)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_expired_selects_by_despawn_time() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let owner = OwnerId::new_v4();
        let old = store.save(new_tombstone(owner, 0), vec![]).await.unwrap();
        let fresh = store
            .save(new_tombstone(owner, 50_000_000), vec![])
            .await
            .unwrap();

        assert!(store.delete_expired(86_400_000).await.unwrap().is_empty());
        let expired = store.delete_expired(86_400_001).await.unwrap();
        assert_eq!(expired, vec![old]);
        let remaining: Vec<RecordId> = store.list_all().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec![fresh]);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::new_v4();
        let id = {
            let store = open_store(&dir).await;
            let id = store
                .save(new_tombstone(owner, 7), vec![ItemEntry::new(40, b"boots".to_vec())])
                .await
                .unwrap();
            store.zero_experience(id).await.unwrap();
            id
        };

        let store = open_store(&dir).await;
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.owner, owner);
        assert_eq!(record.experience, 0);
        assert_eq!(store.load_items(id).await.unwrap()[0].payload, b"boots".to_vec());

        let next = store.save(new_tombstone(owner, 8), vec![]).await.unwrap();
        assert!(next.as_i64() > id.as_i64());
    }

    #[tokio::test]
    async fn test_reopens_after_wal_lost() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let owner = OwnerId::new_v4();
        let first = store.save(new_tombstone(owner, 1), vec![]).await.unwrap();

        std::fs::remove_file(dir.path().join("tombstones.wal")).unwrap();
        assert!(!store.health_check().await.unwrap());

        let second = store.save(new_tombstone(owner, 2), vec![]).await.unwrap();
        assert!(store.health_check().await.unwrap());
        store.close().await.unwrap();

        let reopened = open_store(&dir).await;
        assert!(reopened.get(first).await.unwrap().is_some());
        assert!(reopened.get(second).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let store = FileStore::new(FileStoreConfig::memory()).unwrap();
        assert!(matches!(
            store.list_all().await,
            Err(GraveError::Connection(_))
        ));
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_owner_newest_first() {
        let store = FileStore::new(FileStoreConfig::memory()).unwrap();
        store.initialize().await.unwrap();
        let owner = OwnerId::new_v4();
        let a = store.save(new_tombstone(owner, 100), vec![]).await.unwrap();
        let b = store.save(new_tombstone(owner, 300), vec![]).await.unwrap();
        store
            .save(new_tombstone(OwnerId::new_v4(), 200), vec![])
            .await
            .unwrap();
        let ids: Vec<RecordId> = store
            .list_by_owner(owner)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[tokio::test]
    async fn test_prefixed_file_names() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(
            FileStoreConfig::new(dir.path()).table_prefix("pdm_"),
        )
        .unwrap();
        store.initialize().await.unwrap();
        store.checkpoint().await.unwrap();
        assert!(dir.path().join("pdm_tombstones.snapshot").exists());
        assert!(FileStore::new(FileStoreConfig::new(dir.path()).table_prefix("bad-")).is_err());
    }
}
