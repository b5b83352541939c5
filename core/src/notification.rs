//! Push notification gateway interface.
//!
//! A single outbound call shape delivered over a request/response channel.
//! Delivery is best-effort by contract: callers log failures and move on,
//! and nothing downstream of the ledger ever depends on a send succeeding.
//!
//! # Dyn compatibility
//!
//! [`NotificationGateway::send`] returns an explicit `Pin<Box<dyn Future>>`
//! instead of `async fn` so the gateway can be held as
//! `Arc<dyn NotificationGateway>` inside handlers.

use crate::SmallVec;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Recipient of a push message: one token or a broadcast list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushTarget {
    /// A single device token.
    Token(String),
    /// A list of device tokens (e.g., every admin).
    Tokens(Vec<String>),
}

impl PushTarget {
    /// Whether there is anyone to deliver to.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Token(token) => token.is_empty(),
            Self::Tokens(tokens) => tokens.is_empty(),
        }
    }
}

/// A single outbound push message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushMessage {
    /// Recipient token(s).
    pub to: PushTarget,
    /// Notification sound identifier.
    pub sound: String,
    /// Message title.
    pub title: String,
    /// Message body.
    pub body: String,
}

impl PushMessage {
    /// Builds a message to a single device token.
    #[must_use]
    pub fn to_token(
        token: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: PushTarget::Token(token.into()),
            sound: "default".to_string(),
            title: title.into(),
            body: body.into(),
        }
    }

    /// Builds a broadcast message to a list of device tokens.
    #[must_use]
    pub fn to_tokens(
        tokens: Vec<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: PushTarget::Tokens(tokens),
            sound: "default".to_string(),
            title: title.into(),
            body: body.into(),
        }
    }
}

/// A batch of messages composed by one handler invocation.
///
/// Handlers usually produce at most a user message plus an admin broadcast,
/// so the batch stays inline.
pub type PushBatch = SmallVec<[PushMessage; 4]>;

/// Errors from the push gateway.
///
/// These are logged and swallowed by every caller; they exist so logs can
/// distinguish transport trouble from rejections.
#[derive(Error, Debug)]
pub enum NotificationError {
    /// Transport-level failure (connection refused, DNS, ...).
    #[error("Push transport error: {0}")]
    Transport(String),

    /// The gateway answered with a non-success status.
    #[error("Push gateway rejected the message with status {0}")]
    Rejected(u16),
}

/// Outbound push delivery.
///
/// Implementations must be `Send + Sync`; the engine fans sends out
/// concurrently and never retries a failed one.
pub trait NotificationGateway: Send + Sync {
    /// Deliver one message, best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] on transport failure or a non-success
    /// gateway response. Callers treat any error as "logged and dropped".
    fn send(
        &self,
        message: PushMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>>;
}
