//! # Stamp Ledger Engine
//!
//! The transactional, idempotent event-reaction core: three cooperating
//! handlers driven by at-least-once database change events.
//!
//! - [`FraudGate`](fraud_gate::FraudGate) gates newly created point grants
//!   against a per-user daily usage quota and reverses grants that breach it.
//! - [`InvariantEnforcer`](enforcer::InvariantEnforcer) watches user updates
//!   and self-heals a negative coupon balance, applying a punitive reset to
//!   the day's usage counter.
//! - [`StampEngine`](stamp_engine::StampEngine) reconciles each visit scan
//!   against the shared daily attendance roster and the user's balances in
//!   one optimistic transaction, guarded by an idempotency registry.
//!
//! ## Guarantees
//!
//! Exactly-once ledger effect under at-least-once delivery: every mutation
//! happens inside a bounded-retry optimistic transaction whose first read is
//! the idempotency check, so duplicate and concurrent deliveries of the same
//! logical event settle to a single net effect. Notifications and the audit
//! append run strictly after commit and are best-effort — their failures are
//! logged and swallowed, never rolled into ledger state.

pub mod enforcer;
pub mod error;
pub mod fraud_gate;
pub mod notify;
pub mod stamp_engine;
pub mod trigger;

pub use enforcer::InvariantEnforcer;
pub use error::HandlerError;
pub use fraud_gate::FraudGate;
pub use stamp_engine::StampEngine;
pub use trigger::{LedgerHandlers, TriggerEvent};
