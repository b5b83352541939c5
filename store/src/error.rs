//! Store error types.

use thiserror::Error;

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Optimistic-commit collision: a document read by the transaction was
    /// written concurrently between snapshot and commit.
    ///
    /// `run_transaction` retries these transparently; they only escape when
    /// the attempt budget is exhausted.
    #[error("Concurrency conflict on {document}")]
    Conflict {
        /// Human-readable key of the first conflicting document.
        document: String,
    },

    /// The transaction attempt budget was exhausted without a clean commit.
    ///
    /// Surfaces as a handler-level failure; redelivery of the triggering
    /// event is safe because handlers check the idempotency registry before
    /// mutating anything.
    #[error("Transaction failed after {attempts} attempts")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
    },

    /// A store lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether `run_transaction` should retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
