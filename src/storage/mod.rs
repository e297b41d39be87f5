pub mod file;
pub mod naming;
pub mod persistence;
pub mod postgres;
pub mod tables;

pub use file::{FileStore, FileStoreConfig, StoreStats};
pub use naming::TableNames;
pub use persistence::{DurabilityMode, WalEntry};
pub use postgres::{PgConfig, PostgresStore};
pub use tables::Tables;

use crate::core::{ItemEntry, Millis, NewTombstone, OwnerId, RecordId, Result, TombstoneRecord};
use async_trait::async_trait;

/// Durable tombstone storage - interchangeable backends
///
/// Every mutating multi-step operation runs inside one transaction and is
/// rolled back on failure. Deleting rows that are already gone returns
/// `false` rather than an error.
#[async_trait]
pub trait TombstoneStore: Send + Sync {
    /// Create tables if missing and load any durable state. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Flush and release the backend.
    async fn close(&self) -> Result<()>;

    /// Insert a record and its items atomically, returning the generated id.
    async fn save(&self, tombstone: NewTombstone, items: Vec<ItemEntry>) -> Result<RecordId>;

    /// Delete a record together with its items.
    async fn delete(&self, id: RecordId) -> Result<bool>;

    /// Delete a single item by its origin slot.
    async fn remove_item(&self, id: RecordId, slot_index: u32) -> Result<bool>;

    async fn zero_experience(&self, id: RecordId) -> Result<bool>;

    /// Items ordered by origin slot.
    async fn load_items(&self, id: RecordId) -> Result<Vec<ItemEntry>>;

    async fn get(&self, id: RecordId) -> Result<Option<TombstoneRecord>>;

    /// No items and no experience left. Absent records are not empty.
    async fn is_empty(&self, id: RecordId) -> Result<bool>;

    /// Newest first.
    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<TombstoneRecord>>;

    /// Newest first.
    async fn list_all(&self) -> Result<Vec<TombstoneRecord>>;

    /// Delete every record with `despawn_time < now`, returning their ids.
    async fn delete_expired(&self, now: Millis) -> Result<Vec<RecordId>>;

    /// Bounded liveness probe.
    async fn health_check(&self) -> Result<bool>;
}
