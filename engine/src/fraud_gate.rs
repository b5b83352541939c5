//! Fraud gate: validates newly created point grants against the daily
//! usage quota.
//!
//! A grant is rejected only when a usage counter document exists for the
//! grant's day *and* reads strictly above the quota — an absent counter is
//! no evidence of a breach, and usage exactly at the quota still passes.
//! Rejection reverses the grant atomically (delete + equal `total_point`
//! decrement) and then notifies the user and every admin, best-effort.
//!
//! The counter is read in the same transaction as the reversal it may
//! trigger, but the subsystem that *increments* counters is an external
//! collaborator sharing no transaction with us, so a grant can be validated
//! against a stale (too-low) reading in a genuine race. That race is
//! accepted baseline behavior.

use crate::error::HandlerError;
use crate::notify;
use stampledger_core::{
    DayKey, LedgerConfig, NotificationGateway, PointGrant, PushBatch, PushMessage, User,
};
use stampledger_store::LedgerStore;
use std::sync::Arc;

/// Outcome of the quota-validation transaction.
enum Verdict {
    MissingUser,
    Accepted,
    /// The grant was already reversed (or never landed); duplicate delivery.
    AlreadyReversed,
    Rejected {
        used: u32,
        user: User,
        reversed_points: i64,
    },
}

/// Reactive handler for grant-created events.
pub struct FraudGate {
    store: LedgerStore,
    gateway: Arc<dyn NotificationGateway>,
    config: LedgerConfig,
}

impl FraudGate {
    /// Creates the gate with its injected dependencies.
    #[must_use]
    pub fn new(
        store: LedgerStore,
        gateway: Arc<dyn NotificationGateway>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Handles one grant-created event.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::MissingUser`] if the owning user does not exist
    ///   (terminal, nothing mutated).
    /// - [`HandlerError::Store`] if the reversal transaction exhausts its
    ///   attempt budget or the store fails.
    pub async fn on_grant_created(&self, grant: PointGrant) -> Result<(), HandlerError> {
        let Some(granted_at) = grant.granted_at else {
            // Trusted/internal grant: no timestamp, no validation.
            tracing::info!(grant_id = %grant.id, user_id = %grant.user_id,
                "Grant has no timestamp, quota validation skipped");
            metrics::counter!("fraud_gate.skipped").increment(1);
            return Ok(());
        };

        let day = DayKey::from_datetime(granted_at, self.config.utc_offset_hours);
        let quota = self.config.daily_quota;
        let counter_key = (grant.user_id.clone(), day.clone());
        let grant_id = grant.id.clone();

        let verdict = self
            .store
            .run_transaction(self.config.txn_max_attempts, |txn| {
                let Some(user) = txn.get_user(&grant.user_id)? else {
                    return Ok(Verdict::MissingUser);
                };

                let used = match txn.get_counter(&counter_key)? {
                    // No counter document: no evidence of a quota breach.
                    None => return Ok(Verdict::Accepted),
                    Some(counter) => counter.used,
                };
                if used <= quota {
                    return Ok(Verdict::Accepted);
                }

                // Reject. Re-read the grant so a redelivered event whose
                // reversal already committed settles as a no-op.
                let Some(live) = txn.get_grant(&grant_id)? else {
                    return Ok(Verdict::AlreadyReversed);
                };

                let mut user = user;
                user.total_point -= live.point;
                txn.delete_grant(live.id.clone());
                txn.put_user(user.clone());
                Ok(Verdict::Rejected {
                    used,
                    user,
                    reversed_points: live.point,
                })
            })
            .await?;

        match verdict {
            Verdict::MissingUser => {
                tracing::error!(grant_id = %grant.id, user_id = %grant.user_id,
                    "Grant owner not found, aborting validation");
                Err(HandlerError::MissingUser(grant.user_id))
            }
            Verdict::Accepted => {
                tracing::debug!(grant_id = %grant.id, day = %day, "Grant accepted");
                Ok(())
            }
            Verdict::AlreadyReversed => {
                tracing::info!(grant_id = %grant.id, "Grant already reversed, duplicate absorbed");
                Ok(())
            }
            Verdict::Rejected {
                used,
                user,
                reversed_points,
            } => {
                metrics::counter!("fraud_gate.reversed").increment(1);
                tracing::warn!(grant_id = %grant.id, user_id = %user.id, used, quota,
                    reversed_points, "Daily quota exceeded, grant reversed");
                self.notify_rejection(&user, used, reversed_points).await;
                Ok(())
            }
        }
    }

    /// Composes and dispatches the post-reversal notifications: a
    /// cancellation to the user, a fraud alert to every admin.
    async fn notify_rejection(&self, user: &User, used: u32, reversed_points: i64) {
        let mut batch = PushBatch::new();

        if let Some(token) = &user.push_token {
            batch.push(PushMessage::to_token(
                token.clone(),
                "Point grant cancelled",
                format!(
                    "A grant of {reversed_points} points was cancelled because today's usage limit was exceeded."
                ),
            ));
        }

        match self.store.admins() {
            Ok(admins) => {
                let tokens: Vec<String> = admins
                    .iter()
                    .filter_map(|admin| admin.push_token.clone())
                    .collect();
                batch.push(PushMessage::to_tokens(
                    tokens,
                    "Possible fraud detected",
                    format!(
                        "User {} exceeded the daily quota (usage {used}); a {reversed_points}-point grant was reversed.",
                        user.id
                    ),
                ));
            }
            Err(err) => {
                tracing::warn!(error = %err, "Could not list admins for fraud alert");
            }
        }

        notify::dispatch_all(&self.gateway, self.config.notify_timeout, batch).await;
    }
}
