//! The ledger store: typed document collections behind a single lock.
//!
//! Collections are `HashMap`s of [`Versioned`] documents. The lock is held
//! only for the duration of an individual read or an atomic commit, never
//! across a transaction body, so concurrent handler executions interleave
//! freely and are serialized solely by optimistic validation.

use crate::activity::ActivityLog;
use crate::document::{Version, Versioned};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use stampledger_core::{
    AttendanceRoster, DailyUsageCounter, DayKey, GrantId, PointGrant, Stamp, StampId, User, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Key of a per-(user, day) usage counter document.
pub type CounterKey = (UserId, DayKey);

/// Key in the idempotency registry: identifies one logical trigger event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventKey(String);

impl EventKey {
    /// Creates an event key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one document across all collections, for read recording and
/// conflict reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DocKey {
    User(UserId),
    Grant(GrantId),
    Stamp(StampId),
    Counter(CounterKey),
    Roster(DayKey),
    Event(EventKey),
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user/{id}"),
            Self::Grant(id) => write!(f, "grant/{id}"),
            Self::Stamp(id) => write!(f, "stamp/{id}"),
            Self::Counter((user, day)) => write!(f, "counter/{user}/{day}"),
            Self::Roster(day) => write!(f, "roster/{day}"),
            Self::Event(key) => write!(f, "event/{key}"),
        }
    }
}

/// A buffered transactional write.
#[derive(Clone, Debug)]
pub(crate) enum WriteOp {
    PutUser(User),
    PutGrant(PointGrant),
    DeleteGrant(GrantId),
    PutStamp(Stamp),
    DeleteStamp(StampId),
    PutCounter(CounterKey, DailyUsageCounter),
    PutRoster(DayKey, AttendanceRoster),
    MarkEvent(EventKey),
}

#[derive(Default)]
pub(crate) struct Collections {
    pub(crate) users: HashMap<UserId, Versioned<User>>,
    pub(crate) grants: HashMap<GrantId, Versioned<PointGrant>>,
    pub(crate) stamps: HashMap<StampId, Versioned<Stamp>>,
    pub(crate) counters: HashMap<CounterKey, Versioned<DailyUsageCounter>>,
    pub(crate) rosters: HashMap<DayKey, Versioned<AttendanceRoster>>,
    pub(crate) processed_events: HashMap<EventKey, Versioned<()>>,
}

impl Collections {
    /// Current version of a document, `None` if absent.
    pub(crate) fn version_of(&self, key: &DocKey) -> Option<Version> {
        match key {
            DocKey::User(id) => self.users.get(id).map(|d| d.version),
            DocKey::Grant(id) => self.grants.get(id).map(|d| d.version),
            DocKey::Stamp(id) => self.stamps.get(id).map(|d| d.version),
            DocKey::Counter(k) => self.counters.get(k).map(|d| d.version),
            DocKey::Roster(day) => self.rosters.get(day).map(|d| d.version),
            DocKey::Event(k) => self.processed_events.get(k).map(|d| d.version),
        }
    }

    /// Applies one buffered write, bumping or assigning versions.
    pub(crate) fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutUser(user) => upsert(&mut self.users, user.id.clone(), user),
            WriteOp::PutGrant(grant) => upsert(&mut self.grants, grant.id.clone(), grant),
            WriteOp::DeleteGrant(id) => {
                self.grants.remove(&id);
            }
            WriteOp::PutStamp(stamp) => upsert(&mut self.stamps, stamp.id.clone(), stamp),
            WriteOp::DeleteStamp(id) => {
                self.stamps.remove(&id);
            }
            WriteOp::PutCounter(key, counter) => upsert(&mut self.counters, key, counter),
            WriteOp::PutRoster(day, roster) => upsert(&mut self.rosters, day, roster),
            WriteOp::MarkEvent(key) => upsert(&mut self.processed_events, key, ()),
        }
    }
}

fn upsert<K, V>(map: &mut HashMap<K, Versioned<V>>, key: K, value: V)
where
    K: std::hash::Hash + Eq,
{
    match map.get_mut(&key) {
        Some(doc) => doc.replace(value),
        None => {
            map.insert(key, Versioned::new(value));
        }
    }
}

/// The shared ledger store.
///
/// Cheap to clone; all clones share the same underlying collections and
/// activity log.
#[derive(Clone, Default)]
pub struct LedgerStore {
    inner: Arc<RwLock<Collections>>,
    activity: ActivityLog,
}

impl LedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The append-only activity log.
    #[must_use]
    pub const fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub(crate) fn read_guard(&self) -> Result<RwLockReadGuard<'_, Collections>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn write_guard(&self) -> Result<RwLockWriteGuard<'_, Collections>, StoreError> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    // ---- Committed-state reads (outside any transaction) ----

    /// Reads a user from committed state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read_guard()?.users.get(id).map(|d| d.value.clone()))
    }

    /// Reads a point grant from committed state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn get_grant(&self, id: &GrantId) -> Result<Option<PointGrant>, StoreError> {
        Ok(self.read_guard()?.grants.get(id).map(|d| d.value.clone()))
    }

    /// Reads a stamp from committed state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn get_stamp(&self, id: &StampId) -> Result<Option<Stamp>, StoreError> {
        Ok(self.read_guard()?.stamps.get(id).map(|d| d.value.clone()))
    }

    /// Reads a daily usage counter from committed state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn get_counter(&self, key: &CounterKey) -> Result<Option<DailyUsageCounter>, StoreError> {
        Ok(self.read_guard()?.counters.get(key).map(|d| d.value.clone()))
    }

    /// Reads a day's attendance roster from committed state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn get_roster(&self, day: &DayKey) -> Result<Option<AttendanceRoster>, StoreError> {
        Ok(self.read_guard()?.rosters.get(day).map(|d| d.value.clone()))
    }

    /// Whether an event key is already in the idempotency registry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn is_event_processed(&self, key: &EventKey) -> Result<bool, StoreError> {
        Ok(self.read_guard()?.processed_events.contains_key(key))
    }

    /// All admin users, for fraud/anomaly broadcasts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn admins(&self) -> Result<Vec<User>, StoreError> {
        Ok(self
            .read_guard()?
            .users
            .values()
            .filter(|d| d.value.is_admin)
            .map(|d| d.value.clone())
            .collect())
    }

    // ---- Direct writes by external actors (and test fixtures) ----
    //
    // These model the out-of-scope writers the handlers race against:
    // account creation, scan apps creating stamps/grants, operator roster
    // edits. Each bumps versions exactly like a committed transaction, so
    // they participate in conflict detection.

    /// Inserts or replaces a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.write_guard()?.apply(WriteOp::PutUser(user));
        Ok(())
    }

    /// Inserts a point grant, incrementing the owner's `total_point` by the
    /// grant's value, keeping the grant/points pairing intact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn insert_grant(&self, grant: PointGrant) -> Result<(), StoreError> {
        let mut guard = self.write_guard()?;
        if let Some(doc) = guard.users.get_mut(&grant.user_id) {
            let mut user = doc.value.clone();
            user.total_point += grant.point;
            doc.replace(user);
        }
        guard.apply(WriteOp::PutGrant(grant));
        Ok(())
    }

    /// Inserts a stamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn insert_stamp(&self, stamp: Stamp) -> Result<(), StoreError> {
        self.write_guard()?.apply(WriteOp::PutStamp(stamp));
        Ok(())
    }

    /// Overwrites a daily usage counter (external fraud-relevant activity).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn set_usage(&self, user_id: UserId, day: DayKey, used: u32) -> Result<(), StoreError> {
        self.write_guard()?
            .apply(WriteOp::PutCounter((user_id, day), DailyUsageCounter { used }));
        Ok(())
    }

    /// Adds a user to a day's roster directly, the operator-confirmed path
    /// that races with QR scans.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn add_roster_member(
        &self,
        day: DayKey,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.write_guard()?;
        let roster = match guard.rosters.get(&day) {
            Some(doc) => {
                let mut roster = doc.value.clone();
                roster.members.insert(user_id);
                roster.updated_at = at;
                roster
            }
            None => AttendanceRoster::with_member(user_id, at),
        };
        guard.apply(WriteOp::PutRoster(day, roster));
        Ok(())
    }
}
