// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted.
// The transaction owns two logs: the undo log (`Change`) used on rollback and
// the redo log (`WalEntry`) that is appended to the write-ahead log on commit.
//
// ============================================================================

use super::Change;
use crate::core::{GraveError, Result};
use crate::storage::persistence::WalEntry;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A store transaction
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    undo: Vec<Change>,
    redo: Vec<WalEntry>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            undo: Vec::new(),
            redo: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Record a change together with the WAL entry that replays it.
    pub fn record(&mut self, undo: Change, redo: WalEntry) -> Result<()> {
        if !self.state.is_active() {
            return Err(GraveError::Transaction(format!(
                "{} is {}, cannot record changes",
                self.id, self.state
            )));
        }
        self.undo.push(undo);
        self.redo.push(redo);
        Ok(())
    }

    pub fn change_count(&self) -> usize {
        self.undo.len()
    }

    pub fn is_read_only(&self) -> bool {
        self.undo.is_empty()
    }

    /// Redo log wrapped in Begin/Commit markers, ready for the WAL.
    pub fn framed_redo(&self) -> Vec<WalEntry> {
        let mut framed = Vec::with_capacity(self.redo.len() + 2);
        framed.push(WalEntry::Begin(self.id.0));
        framed.extend(self.redo.iter().cloned());
        framed.push(WalEntry::Commit(self.id.0));
        framed
    }

    /// Finish the transaction, yielding the framed redo log for the WAL.
    pub fn commit(&mut self) -> Result<Vec<WalEntry>> {
        if !self.state.is_active() {
            return Err(GraveError::Transaction(format!("{} not active", self.id)));
        }
        let framed = self.framed_redo();
        self.state = TransactionState::Committed;
        self.undo.clear();
        self.redo.clear();
        Ok(framed)
    }

    /// Abort the transaction, yielding the undo log in reverse order.
    pub fn rollback(&mut self) -> Result<Vec<Change>> {
        if !self.state.is_active() {
            return Err(GraveError::Transaction(format!("{} not active", self.id)));
        }
        self.state = TransactionState::Aborted;
        self.redo.clear();
        let mut undo = std::mem::take(&mut self.undo);
        undo.reverse();
        Ok(undo)
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
