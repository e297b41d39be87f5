//! Everything a host plugin usually needs, in one import.
//!
//! `advanced` exposes the storage and presenter building blocks for hosts
//! that assemble their own pipeline.

pub use crate::{
    AccessOutcome, BreakDecision, Clock, CreateOutcome, CreateRequest, Durations, FileStore,
    FileStoreConfig, GraveError, ItemStack, MarkerKind, Millis, OwnerId, Outcome, PgConfig,
    Position, PostgresStore, RecordId, Result, SimWorld, SystemClock, TombstoneConfig,
    TombstoneInstance, TombstoneItem, TombstoneManager, TombstoneStore, WithdrawOutcome,
    Withdrawn, World,
};

pub mod advanced {
    //! Escape hatch for the layers below the manager.
    pub use crate::presenter::{EffectPresenter, LabelContext, LabelPresenter, LabelText};
    pub use crate::storage::{DurabilityMode, StoreStats, TableNames, Tables};
    pub use crate::sweeper::{ReconciliationSweeper, SweepReport};
    pub use crate::world::{BlockKind, EffectSpec, RegionId};
}
