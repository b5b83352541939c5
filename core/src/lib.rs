//! # Stamp Ledger Core
//!
//! Domain model and shared abstractions for the stamp ledger: a per-user
//! rewards ledger (points, coupons, visit counts) maintained by reactive
//! handlers that consume database change events.
//!
//! ## Contents
//!
//! - **Model**: users, point grants, stamps, daily usage counters, the daily
//!   attendance roster, and activity records ([`model`])
//! - **Day keying**: calendar-day keys in the service's configured offset
//!   ([`day`])
//! - **Configuration**: externally overridable constants injected into each
//!   handler at construction ([`config`])
//! - **Environment**: dependency traits for time and push delivery
//!   ([`environment`], [`notification`])
//!
//! ## Design principles
//!
//! - Entities are plain owned data with serde derives; all mutation happens
//!   through the transactional store, never in place on shared references.
//! - External collaborators (clock, push gateway) are traits so tests can
//!   substitute deterministic implementations.
//! - Invariants (non-negative coupon balance, at-most-one coupon per stamp)
//!   are properties the handlers restore eventually, not write-time guards;
//!   the types here deliberately permit the transient violations the
//!   enforcer exists to heal.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::SmallVec;

pub mod config;
pub mod day;
pub mod environment;
pub mod ids;
pub mod model;
pub mod notification;

pub use config::LedgerConfig;
pub use day::DayKey;
pub use environment::{Clock, SystemClock};
pub use ids::{GrantId, StampId, UserId};
pub use model::{
    ActivityRecord, AttendanceRoster, DailyUsageCounter, PointGrant, ScanOutcome, Stamp,
    StampMethod, User,
};
pub use notification::{
    NotificationError, NotificationGateway, PushBatch, PushMessage, PushTarget,
};
