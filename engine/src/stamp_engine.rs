//! Stamp ledger engine: reconciles each visit scan against the shared daily
//! attendance roster and the user's balances.
//!
//! One atomic, optimistically concurrent transaction per scan event. The
//! transaction re-reads the stamp, user, and roster at commit freshness, so
//! the branch taken always reflects the state the commit validates against
//! — never the (possibly stale) event snapshot. The first read is the
//! idempotency registry, which absorbs duplicate deliveries even on the
//! branch that deletes the stamp entity and therefore cannot leave a
//! processed flag behind.
//!
//! Branches for a QR scan:
//!
//! - user not yet on today's roster → union-add to the roster, grant one
//!   coupon, record the per-stamp award, count the trip, mark processed;
//! - user already on the roster (pre-registered by the operator-confirmed
//!   path) → revoke one coupon if any, clear the per-stamp award, and
//!   *delete* the stamp — no record persists for an operator-confirmed
//!   visit.
//!
//! ADMIN stamps count the trip only; unknown methods settle with no ledger
//! effect and are classified as anomalies.
//!
//! Post-commit work (notifications, the single audit append) is strictly
//! best-effort and never rolls back the committed mutation.

use crate::error::HandlerError;
use crate::notify;
use stampledger_core::{
    ActivityRecord, AttendanceRoster, Clock, DayKey, LedgerConfig, NotificationGateway,
    PushBatch, PushMessage, ScanOutcome, Stamp, StampMethod, User,
};
use stampledger_store::{EventKey, LedgerStore};
use std::sync::Arc;
use uuid::Uuid;

/// How the settlement transaction concluded.
enum Settlement {
    /// Duplicate delivery (registry hit, entity gone, or flag already set).
    AlreadyProcessed,
    /// User absent; the stamp was marked processed defensively.
    MissingUser,
    /// The event settled; `user` is the post-transaction view.
    Processed { outcome: ScanOutcome, user: User },
}

/// Reactive handler for stamp-created events.
pub struct StampEngine {
    store: LedgerStore,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl StampEngine {
    /// Creates the engine with its injected dependencies.
    #[must_use]
    pub fn new(
        store: LedgerStore,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            config,
        }
    }

    /// The idempotency-registry key for a stamp-created event.
    #[must_use]
    pub fn event_key(stamp: &Stamp) -> EventKey {
        EventKey::new(format!("stamp-created/{}", stamp.id))
    }

    /// Handles one stamp-created event.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Store`] if the settlement transaction
    /// exhausts its attempt budget or the store fails. Redelivery after such
    /// a failure is safe: the registry check makes replays no-ops once a
    /// settlement has committed.
    pub async fn on_stamp_created(&self, stamp: Stamp) -> Result<(), HandlerError> {
        let event_key = Self::event_key(&stamp);
        // The roster day comes from the scan's own timestamp, so a
        // redelivery that straddles midnight reconciles against the same
        // roster as the original delivery.
        let day = DayKey::from_datetime(stamp.created_at, self.config.utc_offset_hours);
        let stamp_id = stamp.id.clone();

        let settlement = self
            .store
            .run_transaction(self.config.txn_max_attempts, |txn| {
                if txn.already_processed(&event_key)? {
                    return Ok(Settlement::AlreadyProcessed);
                }
                let Some(fresh) = txn.get_stamp(&stamp_id)? else {
                    // Settled earlier by the deletion branch.
                    return Ok(Settlement::AlreadyProcessed);
                };
                if fresh.processed_by_server {
                    return Ok(Settlement::AlreadyProcessed);
                }

                let Some(mut user) = txn.get_user(&fresh.user_id)? else {
                    // Defensive: settle the stamp rather than leave a
                    // permanently unprocessed sentinel behind.
                    let mut settled = fresh;
                    settled.processed_by_server = true;
                    txn.put_stamp(settled);
                    txn.mark_event(event_key.clone());
                    return Ok(Settlement::MissingUser);
                };

                let outcome = match fresh.method {
                    StampMethod::Qr => {
                        let roster = txn.get_roster(&day)?;
                        let already_member =
                            roster.as_ref().is_some_and(|r| r.contains(&user.id));

                        if already_member {
                            // Pre-registered by the operator-confirmed path:
                            // roll back the automatic grant and erase the
                            // stamp instead of flagging it.
                            if user.bait_coupons > 0 {
                                user.bait_coupons -= 1;
                            }
                            user.awarded_stamps.remove(&fresh.id);
                            txn.put_user(user.clone());
                            txn.delete_stamp(fresh.id.clone());
                            txn.mark_event(event_key.clone());
                            ScanOutcome::PreRegisteredRollback
                        } else {
                            let now = self.clock.now();
                            let roster = match roster {
                                Some(mut roster) => {
                                    roster.members.insert(user.id.clone());
                                    roster.updated_at = now;
                                    roster
                                }
                                None => AttendanceRoster::with_member(user.id.clone(), now),
                            };
                            txn.put_roster(day.clone(), roster);

                            user.bait_coupons += 1;
                            user.awarded_stamps.insert(fresh.id.clone());
                            user.trip_count += 1;
                            txn.put_user(user.clone());

                            let mut settled = fresh.clone();
                            settled.processed_by_server = true;
                            txn.put_stamp(settled);
                            txn.mark_event(event_key.clone());
                            ScanOutcome::Registered
                        }
                    }
                    StampMethod::Admin => {
                        user.trip_count += 1;
                        txn.put_user(user.clone());

                        let mut settled = fresh.clone();
                        settled.processed_by_server = true;
                        txn.put_stamp(settled);
                        txn.mark_event(event_key.clone());
                        ScanOutcome::AdminStamp
                    }
                    StampMethod::Unknown => {
                        let mut settled = fresh.clone();
                        settled.processed_by_server = true;
                        txn.put_stamp(settled);
                        txn.mark_event(event_key.clone());
                        ScanOutcome::Anomaly
                    }
                };

                Ok(Settlement::Processed { outcome, user })
            })
            .await?;

        match settlement {
            Settlement::AlreadyProcessed => {
                metrics::counter!("stamp_engine.duplicates_absorbed").increment(1);
                tracing::debug!(stamp_id = %stamp.id, "Duplicate delivery absorbed");
                Ok(())
            }
            Settlement::MissingUser => {
                metrics::counter!("stamp_engine.missing_user").increment(1);
                tracing::error!(stamp_id = %stamp.id, user_id = %stamp.user_id,
                    "Scanning user not found; stamp settled with no ledger effect");
                Ok(())
            }
            Settlement::Processed { outcome, user } => {
                metrics::counter!("stamp_engine.processed", "outcome" => outcome.to_string())
                    .increment(1);
                tracing::info!(stamp_id = %stamp.id, user_id = %user.id, %outcome, %day,
                    "Scan settled");
                self.after_commit(&stamp, &user, outcome, &day).await;
                Ok(())
            }
        }
    }

    /// Post-commit phase: notifications and the single audit append.
    /// Failures here are logged and swallowed; the ledger mutation stands.
    async fn after_commit(&self, stamp: &Stamp, user: &User, outcome: ScanOutcome, day: &DayKey) {
        // Re-read for a fresh token: the device may have registered between
        // the event snapshot and now.
        let fresh = match self.store.get_user(&user.id) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => user.clone(),
            Err(err) => {
                tracing::warn!(error = %err, "Post-commit user re-read failed");
                user.clone()
            }
        };

        let mut batch = PushBatch::new();
        if let Some(token) = &fresh.push_token {
            batch.push(Self::user_message(token, &fresh, outcome));
        }
        if matches!(
            outcome,
            ScanOutcome::Registered | ScanOutcome::PreRegisteredRollback | ScanOutcome::AdminStamp
        ) {
            if let Some(message) = self.admin_message(&fresh, outcome) {
                batch.push(message);
            }
        }
        notify::dispatch_all(&self.gateway, self.config.notify_timeout, batch).await;

        // On the rollback branch the entity is gone, but the audit trail
        // still names the stamp.
        self.store.activity().append(ActivityRecord {
            id: Uuid::new_v4().to_string(),
            user_id: fresh.id.clone(),
            stamp_id: Some(stamp.id.clone()),
            outcome,
            day: day.clone(),
            recorded_at: self.clock.now(),
            detail: serde_json::json!({
                "method": method_label(stamp.method),
                "bait_coupons": fresh.bait_coupons,
                "trip_count": fresh.trip_count,
            }),
        });
    }

    fn user_message(token: &str, user: &User, outcome: ScanOutcome) -> PushMessage {
        let (title, body) = match outcome {
            ScanOutcome::Registered => (
                "Visit registered",
                format!(
                    "Your visit was registered. You now have {} coupon(s) and {} recorded trip(s).",
                    user.bait_coupons, user.trip_count
                ),
            ),
            ScanOutcome::PreRegisteredRollback => (
                "Visit already registered",
                "Your visit was already confirmed by staff, so the automatic coupon was withdrawn."
                    .to_string(),
            ),
            ScanOutcome::AdminStamp => (
                "Visit recorded",
                format!("A staff member recorded your visit. Trips: {}.", user.trip_count),
            ),
            ScanOutcome::Anomaly => (
                "Scan received",
                "Your scan was received but could not be classified.".to_string(),
            ),
        };
        PushMessage::to_token(token, title, body)
    }

    fn admin_message(&self, user: &User, outcome: ScanOutcome) -> Option<PushMessage> {
        let tokens: Vec<String> = match self.store.admins() {
            Ok(admins) => admins
                .iter()
                .filter_map(|admin| admin.push_token.clone())
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "Could not list admins for scan notification");
                return None;
            }
        };

        let body = match outcome {
            ScanOutcome::Registered => format!("User {} registered a new visit by QR.", user.id),
            ScanOutcome::PreRegisteredRollback => format!(
                "User {} scanned after being pre-registered; the automatic coupon was rolled back.",
                user.id
            ),
            ScanOutcome::AdminStamp => {
                format!("An administrative stamp was recorded for user {}.", user.id)
            }
            ScanOutcome::Anomaly => return None,
        };
        Some(PushMessage::to_tokens(tokens, "Visit scan", body))
    }
}

const fn method_label(method: StampMethod) -> &'static str {
    match method {
        StampMethod::Qr => "QR",
        StampMethod::Admin => "ADMIN",
        StampMethod::Unknown => "UNKNOWN",
    }
}
