//! # Stamp Ledger Store
//!
//! Versioned in-memory document store with optimistic multi-document
//! transactions. This is the concurrency-correctness substrate for the
//! reactive handlers: there are no locks held across a transaction body;
//! instead every read records the document version it observed, and the
//! commit re-validates all of them atomically before applying any write.
//!
//! ## Transaction model
//!
//! - [`Transaction`] reads snapshot the committed state and record
//!   `(document, observed version-or-absence)` pairs.
//! - Writes and deletes are buffered; nothing is visible until commit.
//! - Commit takes the write lock once, re-checks every recorded read, and
//!   either applies *all* buffered writes or fails with
//!   [`StoreError::Conflict`] and zero partial effect.
//! - [`LedgerStore::run_transaction`] retries conflicted bodies with
//!   jittered exponential backoff up to an explicit attempt budget.
//!
//! ## Idempotency registry
//!
//! Alongside the entity collections the store keeps a durable set of
//! already-processed event keys ([`EventKey`]). Handlers check it inside the
//! transaction before any mutation, which also covers settlement branches
//! that *delete* the triggering entity and therefore cannot leave a flag on
//! it.

pub mod activity;
pub mod document;
pub mod error;
pub mod ledger;
pub mod txn;

pub use activity::ActivityLog;
pub use document::{Version, Versioned};
pub use error::StoreError;
pub use ledger::{CounterKey, EventKey, LedgerStore};
pub use txn::Transaction;
