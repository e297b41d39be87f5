//! Write-Ahead Logging (WAL) and snapshots for the file-backed store

use super::tables::Tables;
use crate::core::{GraveError, ItemEntry, RecordId, Result, TombstoneRecord};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Write-Ahead Log entry types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntry {
    Begin(u64),
    Commit(u64),
    InsertRecord(TombstoneRecord),
    InsertItem { id: RecordId, entry: ItemEntry },
    DeleteRecord(RecordId),
    DeleteItem { id: RecordId, slot_index: u32 },
    SetExperience { id: RecordId, experience: u32 },
}

// ============================================================================
// Store Snapshot
// ============================================================================

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub tables: Tables,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: i64,
    pub record_count: usize,
    pub item_count: usize,
}

impl StoreSnapshot {
    pub fn new(tables: Tables) -> Self {
        let metadata = SnapshotMetadata {
            created_at: chrono::Utc::now().timestamp_millis(),
            record_count: tables.record_count(),
            item_count: tables.item_count(),
        };
        Self {
            version: SNAPSHOT_VERSION,
            tables,
            metadata,
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurabilityMode {
    /// fsync after every committed transaction
    Sync,
    /// flush to the OS, no fsync
    #[default]
    Async,
    /// memory only, nothing touches disk
    None,
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        let wal_file = if durability_mode != DurabilityMode::None {
            if let Some(parent) = wal_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    GraveError::Io(format!("Failed to create WAL directory: {}", e))
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&wal_path)
                .map_err(|e| GraveError::Io(format!("Failed to open WAL file: {}", e)))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    /// Append one committed transaction. Entries are length-prefixed MessagePack.
    pub fn append_batch(&mut self, entries: &[WalEntry]) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| GraveError::Connection("WAL file not open".to_string()))?;
        for entry in entries {
            let serialized = rmp_serde::to_vec(entry)?;
            let len = serialized.len() as u32;
            file.write_all(&len.to_le_bytes())
                .map_err(|e| GraveError::Io(format!("Failed to write WAL: {}", e)))?;
            file.write_all(&serialized)
                .map_err(|e| GraveError::Io(format!("Failed to write WAL: {}", e)))?;
        }
        file.flush()
            .map_err(|e| GraveError::Io(format!("Failed to flush WAL: {}", e)))?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut()
                .sync_all()
                .map_err(|e| GraveError::Io(format!("Failed to sync WAL: {}", e)))?;
        }
        self.entries_since_checkpoint += entries.len();
        Ok(())
    }

    /// Read every complete entry. A torn tail (crash mid-append) ends the read.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path)
            .map_err(|e| GraveError::Io(format!("Failed to open WAL for reading: {}", e)))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(GraveError::Io(format!(
                        "Failed to read WAL entry length: {}",
                        e
                    )));
                }
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::warn!(
                        "WAL {} ends with a torn entry, ignoring tail",
                        self.wal_path.display()
                    );
                    break;
                }
                Err(e) => {
                    return Err(GraveError::Io(format!("Failed to read WAL entry data: {}", e)));
                }
            }
            let entry: WalEntry = rmp_serde::from_slice(&data)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| GraveError::Io(format!("Failed to truncate WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    /// The WAL is usable when its file handle is open and still linked on disk.
    pub fn is_healthy(&self) -> bool {
        self.durability_mode == DurabilityMode::None
            || (self.wal_file.is_some() && self.wal_path.exists())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }

    pub fn path(&self) -> &Path {
        &self.wal_path
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Write atomically: temp file in the same directory, fsync, rename.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let dir = match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| GraveError::Io(format!("Failed to create snapshot directory: {}", e)))?;
        let serialized = rmp_serde::to_vec(snapshot)?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| GraveError::Io(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&serialized)
            .map_err(|e| GraveError::Io(format!("Failed to write snapshot: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| GraveError::Io(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| GraveError::Io(format!("Failed to rename snapshot: {}", e.error)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.snapshot_path)
            .map_err(|e| GraveError::Io(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(GraveError::Storage(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    /// Files are named after the (prefixed) table stem: `<stem>.wal`, `<stem>.snapshot`.
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        stem: &str,
        durability_mode: DurabilityMode,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(format!("{}.wal", stem)), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(format!("{}.snapshot", stem)));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log_commit(&mut self, entries: &[WalEntry]) -> Result<()> {
        self.wal.append_batch(entries)
    }

    pub fn checkpoint(&mut self, tables: &Tables) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.snapshot.save(&StoreSnapshot::new(tables.clone()))?;
        self.wal.clear()?;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    pub fn is_healthy(&self) -> bool {
        self.wal.is_healthy()
    }

    /// Snapshot plus every fully committed WAL transaction. Incomplete
    /// transactions at the tail are discarded.
    pub fn recover(&self) -> Result<Tables> {
        let mut tables = match self.snapshot.load()? {
            Some(snapshot) => snapshot.tables,
            None => Tables::new(),
        };

        let mut pending: Option<(u64, Vec<WalEntry>)> = None;
        let mut replayed = 0usize;
        for entry in self.wal.read_all()? {
            match entry {
                WalEntry::Begin(txn) => {
                    if let Some((open, _)) = pending.take() {
                        log::warn!("WAL transaction {} never committed, discarding", open);
                    }
                    pending = Some((txn, Vec::new()));
                }
                WalEntry::Commit(txn) => match pending.take() {
                    Some((open, body)) if open == txn => {
                        for change in body {
                            tables.apply(change)?;
                        }
                        replayed += 1;
                    }
                    _ => log::warn!("WAL commit {} without matching begin, ignoring", txn),
                },
                change => match pending.as_mut() {
                    Some((_, body)) => body.push(change),
                    None => log::warn!("WAL entry outside a transaction, ignoring"),
                },
            }
        }
        if let Some((open, _)) = pending {
            log::warn!("WAL transaction {} never committed, discarding", open);
        }
        log::debug!("recovered tombstone store, replayed {} transactions", replayed);
        Ok(tables)
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OwnerId, Position};
    use tempfile::TempDir;

    fn sample_record(id: i64) -> TombstoneRecord {
        TombstoneRecord {
            id: RecordId(id),
            owner: OwnerId::new_v4(),
            position: Position::new("world", 1, 64, 1),
            death_time: 1_000,
            protection_expire: 2_000,
            despawn_time: 3_000,
            experience: 7,
        }
    }

    #[test]
    fn test_wal_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append_batch(&[
            WalEntry::Begin(1),
            WalEntry::InsertRecord(sample_record(1)),
            WalEntry::Commit(1),
        ])
        .unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(wal.entries_since_checkpoint(), 3);
    }

    #[test]
    fn test_snapshot_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot_mgr = SnapshotManager::new(temp_dir.path().join("test.snapshot"));
        let mut tables = Tables::new();
        tables.insert_record(sample_record(1)).unwrap();
        snapshot_mgr.save(&StoreSnapshot::new(tables)).unwrap();
        assert!(snapshot_mgr.exists());
        let loaded = snapshot_mgr.load().unwrap().unwrap();
        assert_eq!(loaded.metadata.record_count, 1);
        assert!(loaded.tables.record(RecordId(1)).is_some());
    }

    #[test]
    fn test_checkpoint_clears_wal() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence =
            PersistenceManager::new(temp_dir.path(), "tombstones", DurabilityMode::Sync).unwrap();
        persistence
            .log_commit(&[WalEntry::Begin(1), WalEntry::Commit(1)])
            .unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 2);
        persistence.checkpoint(&Tables::new()).unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 0);
        assert!(persistence.snapshot().exists());
    }

    #[test]
    fn test_recovery_skips_uncommitted_tail() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence =
            PersistenceManager::new(temp_dir.path(), "tombstones", DurabilityMode::Sync).unwrap();
        persistence
            .log_commit(&[
                WalEntry::Begin(1),
                WalEntry::InsertRecord(sample_record(1)),
                WalEntry::InsertItem {
                    id: RecordId(1),
                    entry: ItemEntry::new(3, vec![3]),
                },
                WalEntry::Commit(1),
                WalEntry::Begin(2),
                WalEntry::InsertRecord(sample_record(2)),
            ])
            .unwrap();

        let tables = persistence.recover().unwrap();
        assert!(tables.record(RecordId(1)).is_some());
        assert_eq!(tables.items(RecordId(1)).len(), 1);
        assert!(tables.record(RecordId(2)).is_none());
    }

    #[test]
    fn test_recovery_ignores_torn_entry() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence =
            PersistenceManager::new(temp_dir.path(), "tombstones", DurabilityMode::Sync).unwrap();
        persistence
            .log_commit(&[
                WalEntry::Begin(1),
                WalEntry::InsertRecord(sample_record(1)),
                WalEntry::Commit(1),
            ])
            .unwrap();
        let wal_path = persistence.wal().path().to_path_buf();
        drop(persistence);

        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let persistence =
            PersistenceManager::new(temp_dir.path(), "tombstones", DurabilityMode::Sync).unwrap();
        let tables = persistence.recover().unwrap();
        assert_eq!(tables.record_count(), 1);
    }

    #[test]
    fn test_memory_only_mode_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence =
            PersistenceManager::new(temp_dir.path(), "tombstones", DurabilityMode::None).unwrap();
        persistence
            .log_commit(&[WalEntry::Begin(1), WalEntry::Commit(1)])
            .unwrap();
        persistence.checkpoint(&Tables::new()).unwrap();
        assert!(!temp_dir.path().join("tombstones.wal").exists());
        assert!(persistence.is_healthy());
    }
}
