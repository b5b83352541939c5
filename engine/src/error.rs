//! Handler error taxonomy.
//!
//! Only genuinely abnormal conditions become errors. A missing timestamp is
//! a logged skip, not an error; a swallowed push failure never surfaces
//! here. What remains is the terminal missing-user abort and store failures
//! (of which retry exhaustion is the interesting one — conflicts below the
//! attempt budget never escape the transaction primitive).

use stampledger_core::UserId;
use stampledger_store::StoreError;
use thiserror::Error;

/// Errors surfaced by handler execution.
///
/// The trigger boundary logs these and acknowledges the event anyway,
/// trading guaranteed eventual processing for freedom from redelivery
/// loops; the idempotency registry makes a later manual replay safe.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A referenced user does not exist: terminal for this event, no ledger
    /// mutation, not retried.
    #[error("Referenced user {0} does not exist")]
    MissingUser(UserId),

    /// Store failure, including an exhausted transaction attempt budget.
    #[error(transparent)]
    Store(#[from] StoreError),
}
