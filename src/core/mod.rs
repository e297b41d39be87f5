pub mod error;
pub mod types;

pub use error::{GraveError, Result};
pub use types::{ItemEntry, Millis, NewTombstone, OwnerId, Position, RecordId, TombstoneRecord};
