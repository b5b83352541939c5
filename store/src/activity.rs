//! Append-only activity log.
//!
//! One entry per successfully processed scan event, appended outside any
//! transaction. Entries are never mutated or deleted; a failure to append
//! (poisoned lock) is logged and swallowed, because audit completeness is
//! explicitly subordinate to ledger correctness.

use stampledger_core::ActivityRecord;
use std::sync::{Arc, RwLock};

/// The shared append-only log.
#[derive(Clone, Default)]
pub struct ActivityLog {
    entries: Arc<RwLock<Vec<ActivityRecord>>>,
}

impl ActivityLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record. Best-effort: a poisoned lock is logged, not
    /// propagated.
    pub fn append(&self, record: ActivityRecord) {
        match self.entries.write() {
            Ok(mut entries) => entries.push(record),
            Err(_) => {
                tracing::error!(record_id = %record.id, "Activity log lock poisoned, entry dropped");
            }
        }
    }

    /// Snapshot of all entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<ActivityRecord> {
        self.entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
