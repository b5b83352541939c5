//! Ledger entities.
//!
//! All entities are plain owned data with serde derives. External actors
//! create users, grants, and stamps; the handlers consume them (validate,
//! mutate, or delete) exactly once. Counters and rosters are created lazily
//! on first reference for a day and never deleted.
//!
//! # Invariants (restored eventually, not enforced at write time)
//!
//! 1. A stamp is processed at most once: `processed_by_server` transitions
//!    false→true exactly once, or the entity is deleted — never both.
//! 2. `bait_coupons >= 0` holds eventually.
//! 3. At most one coupon grant is ever attributable to a given
//!    (user, stamp) pair, tracked via [`User::awarded_stamps`].
//! 4. `DailyUsageCounter::used` only grows through legitimate activity or is
//!    forcibly overwritten by the enforcer's corrective reset.
//! 5. Every live [`PointGrant`] corresponds to exactly one unreversed
//!    `total_point` increment of equal magnitude.

use crate::day::DayKey;
use crate::ids::{GrantId, StampId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A user's rewards ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Sum of active point grants.
    pub total_point: i64,
    /// Coupon balance. May go transiently negative through out-of-band
    /// writes; the invariant enforcer clamps it back to zero.
    pub bait_coupons: i64,
    /// Number of recorded visits. Monotonic non-decreasing.
    pub trip_count: u64,
    /// Whether this user receives fraud/anomaly broadcasts.
    pub is_admin: bool,
    /// Push token, if the user has registered a device.
    pub push_token: Option<String>,
    /// Stamps that have already produced a coupon for this user.
    ///
    /// A bounded association replacing per-stamp dynamically named flags:
    /// membership means "this stamp's coupon was granted and not revoked".
    pub awarded_stamps: HashSet<StampId>,
}

impl User {
    /// Creates a user with zeroed balances.
    #[must_use]
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            total_point: 0,
            bait_coupons: 0,
            trip_count: 0,
            is_admin: false,
            push_token: None,
            awarded_stamps: HashSet::new(),
        }
    }

    /// Whether a coupon has been attributed to the given stamp.
    #[must_use]
    pub fn has_award_for(&self, stamp_id: &StampId) -> bool {
        self.awarded_stamps.contains(stamp_id)
    }
}

/// An award of points, created by external flows and validated reactively.
///
/// Existence implies `total_point` was incremented by `point` exactly once;
/// deleting a grant must pair with an equal decrement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointGrant {
    /// Grant identifier.
    pub id: GrantId,
    /// Owning user.
    pub user_id: UserId,
    /// Point value of the grant.
    pub point: i64,
    /// Effective timestamp. Absent for trusted/internal grants, which skip
    /// quota validation entirely.
    pub granted_at: Option<DateTime<Utc>>,
}

/// How a visit stamp was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StampMethod {
    /// Self-service QR scan.
    Qr,
    /// Operator-initiated administrative stamp.
    Admin,
    /// Anything else. Classified as an anomaly; no ledger effect.
    #[serde(other)]
    Unknown,
}

/// A single visit scan awaiting (or past) reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    /// Stamp identifier.
    pub id: StampId,
    /// Scanning user.
    pub user_id: UserId,
    /// How the stamp was produced.
    pub method: StampMethod,
    /// Write-once flag: set exactly once when the engine settles the stamp.
    /// A stamp settled by deletion never carries it (the entity is gone).
    pub processed_by_server: bool,
    /// When the scan happened. Also selects which day's roster the scan
    /// reconciles against.
    pub created_at: DateTime<Utc>,
}

impl Stamp {
    /// Creates an unprocessed stamp.
    #[must_use]
    pub fn new(id: StampId, user_id: UserId, method: StampMethod, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            method,
            processed_by_server: false,
            created_at,
        }
    }
}

/// Per-(user, day) count of fraud-relevant activity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsageCounter {
    /// Number of counted activities for the day.
    pub used: u32,
}

/// Per-day set of users recorded as having attended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRoster {
    /// Members recorded for the day.
    pub members: HashSet<UserId>,
    /// Last time the roster was touched.
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRoster {
    /// Creates a roster with a single initial member.
    #[must_use]
    pub fn with_member(user_id: UserId, at: DateTime<Utc>) -> Self {
        let mut members = HashSet::new();
        members.insert(user_id);
        Self {
            members,
            updated_at: at,
        }
    }

    /// Whether the user is already on the roster.
    #[must_use]
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.members.contains(user_id)
    }
}

/// Outcome of a settled scan event, as recorded in the activity log and
/// distinguished in admin notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOutcome {
    /// New QR visit: roster gained the user, coupon granted, trip counted.
    Registered,
    /// The user was pre-registered by another path; the automatic coupon was
    /// revoked and the stamp entity deleted.
    PreRegisteredRollback,
    /// Administrative stamp: trip counted, no roster or coupon effect.
    AdminStamp,
    /// Unknown method: no ledger effect beyond marking the stamp processed.
    Anomaly,
}

impl std::fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Registered => "registered",
            Self::PreRegisteredRollback => "pre-registered-rollback",
            Self::AdminStamp => "admin-stamp",
            Self::Anomaly => "anomaly",
        };
        write!(f, "{label}")
    }
}

/// One immutable audit entry per successfully processed scan event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Record identifier.
    pub id: String,
    /// User the event concerned.
    pub user_id: UserId,
    /// Stamp the event concerned, when one was involved.
    pub stamp_id: Option<StampId>,
    /// How the event settled.
    pub outcome: ScanOutcome,
    /// Day the event reconciled against.
    pub day: DayKey,
    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,
    /// Free-form detail payload (balances after, method, ...).
    pub detail: serde_json::Value,
}
