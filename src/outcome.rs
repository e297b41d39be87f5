//! Caller-facing results. The embedding layer turns these into messages;
//! nothing here formats user text.

use crate::codec::TombstoneItem;
use crate::core::{Millis, RecordId};
use crate::instance::TombstoneInstance;

/// Flat signal every specific outcome maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Created,
    LimitReached,
    NoSpace,
    CreationFailed,
    NotFound,
    Removed,
    AlreadyEmpty,
    Taken,
    Denied,
    Protected,
    Failed,
    Allowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created {
        instance: TombstoneInstance,
        /// Records evicted to make room, oldest first
        evicted: Vec<RecordId>,
    },
    LimitReached {
        max: usize,
        current: usize,
    },
    NoSpace,
    CreationFailed,
}

impl CreateOutcome {
    pub fn signal(&self) -> Outcome {
        match self {
            CreateOutcome::Created { .. } => Outcome::Created,
            CreateOutcome::LimitReached { .. } => Outcome::LimitReached,
            CreateOutcome::NoSpace => Outcome::NoSpace,
            CreateOutcome::CreationFailed => Outcome::CreationFailed,
        }
    }

    pub fn instance(&self) -> Option<&TombstoneInstance> {
        match self {
            CreateOutcome::Created { instance, .. } => Some(instance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    Granted {
        items: Vec<TombstoneItem>,
        experience: u32,
    },
    Protected {
        remaining_ms: Millis,
    },
    NotFound,
    Failed,
}

impl AccessOutcome {
    pub fn signal(&self) -> Outcome {
        match self {
            AccessOutcome::Granted { .. } => Outcome::Allowed,
            AccessOutcome::Protected { .. } => Outcome::Protected,
            AccessOutcome::NotFound => Outcome::NotFound,
            AccessOutcome::Failed => Outcome::Failed,
        }
    }
}

/// What a withdrawal handed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Withdrawn {
    Item(TombstoneItem),
    Experience(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Taken(Withdrawn),
    /// Taken, and the tombstone was empty afterwards and got torn down
    Removed(Withdrawn),
    AlreadyEmpty,
    NotFound,
    Denied {
        remaining_ms: Millis,
    },
    Failed,
}

impl WithdrawOutcome {
    pub fn signal(&self) -> Outcome {
        match self {
            WithdrawOutcome::Taken(_) => Outcome::Taken,
            WithdrawOutcome::Removed(_) => Outcome::Removed,
            WithdrawOutcome::AlreadyEmpty => Outcome::AlreadyEmpty,
            WithdrawOutcome::NotFound => Outcome::NotFound,
            WithdrawOutcome::Denied { .. } => Outcome::Denied,
            WithdrawOutcome::Failed => Outcome::Failed,
        }
    }

    pub fn withdrawn(&self) -> Option<&Withdrawn> {
        match self {
            WithdrawOutcome::Taken(w) | WithdrawOutcome::Removed(w) => Some(w),
            _ => None,
        }
    }
}

/// Whether a player may break the block at a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakDecision {
    NotTombstone,
    /// Markers in this world are unbreakable; admins get pointed at the id
    SkullProtected {
        record_id: RecordId,
        admin_hint: bool,
    },
    Protected {
        remaining_ms: Millis,
    },
    /// Break goes ahead; `owner` callers should be told to collect instead
    Allowed {
        owner: bool,
    },
}

impl BreakDecision {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BreakDecision::SkullProtected { .. } | BreakDecision::Protected { .. }
        )
    }

    pub fn signal(&self) -> Outcome {
        match self {
            BreakDecision::NotTombstone => Outcome::NotFound,
            BreakDecision::SkullProtected { .. } | BreakDecision::Protected { .. } => {
                Outcome::Protected
            }
            BreakDecision::Allowed { .. } => Outcome::Allowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals() {
        assert_eq!(CreateOutcome::NoSpace.signal(), Outcome::NoSpace);
        assert_eq!(
            CreateOutcome::LimitReached { max: 3, current: 3 }.signal(),
            Outcome::LimitReached
        );
        assert_eq!(
            WithdrawOutcome::Removed(Withdrawn::Experience(5)).signal(),
            Outcome::Removed
        );
        assert_eq!(
            WithdrawOutcome::Removed(Withdrawn::Experience(5)).withdrawn(),
            Some(&Withdrawn::Experience(5))
        );
        assert_eq!(AccessOutcome::Protected { remaining_ms: 1 }.signal(), Outcome::Protected);
    }

    #[test]
    fn test_break_cancellation() {
        assert!(
            BreakDecision::SkullProtected {
                record_id: RecordId(1),
                admin_hint: false
            }
            .is_cancelled()
        );
        assert!(!BreakDecision::Allowed { owner: true }.is_cancelled());
        assert!(!BreakDecision::NotTombstone.is_cancelled());
    }
}
