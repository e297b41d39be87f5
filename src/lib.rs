// ============================================================================
// Gravekeeper Library
// ============================================================================

//! Durable death records for game worlds.
//!
//! A tombstone is a stored record (owner, position, timestamps, experience
//! and the items keyed by their inventory slot) plus its visible pieces in
//! the world: a tagged marker block, a floating label and an ambient effect.
//! [`TombstoneManager`] keeps the two sides consistent across creation,
//! withdrawal, expiry, restarts and partial failures.
//!
//! ```no_run
//! use gravekeeper::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> gravekeeper::Result<()> {
//! let store = Arc::new(FileStore::open_dir("./graves")?);
//! let world = Arc::new(SimWorld::with_worlds(&["world"]));
//! let mut manager = TombstoneManager::new(store, world, TombstoneConfig::default())?;
//! manager.initialize().await?;
//!
//! let owner = OwnerId::new_v4();
//! let outcome = manager
//!     .create_tombstone(
//!         CreateRequest::new(owner, Position::new("world", 10, 64, -3))
//!             .slots(vec![Some(ItemStack::new("diamond_sword", 1))])
//!             .experience(120),
//!     )
//!     .await;
//! assert_eq!(outcome.signal(), Outcome::Created);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod codec;
pub mod core;
pub mod instance;
pub mod manager;
pub mod outcome;
pub mod policy;
pub mod prelude;
pub mod presenter;
pub mod storage;
pub mod sweeper;
pub mod transaction;
pub mod world;

pub use crate::core::{
    GraveError, ItemEntry, Millis, NewTombstone, OwnerId, Position, RecordId, Result,
    TombstoneRecord,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{ItemStack, TombstoneItem};
pub use instance::TombstoneInstance;
pub use manager::{CreateRequest, RestoreReport, TeardownMode, TombstoneManager};
pub use outcome::{
    AccessOutcome, BreakDecision, CreateOutcome, Outcome, WithdrawOutcome, Withdrawn,
};
pub use policy::{Durations, MarkerKind, TombstoneConfig};
pub use storage::{FileStore, FileStoreConfig, PgConfig, PostgresStore, TombstoneStore};
pub use sweeper::{ReconciliationSweeper, SweepReport};
pub use world::{SimWorld, World};
