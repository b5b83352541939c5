//! Invariant enforcer: self-heals a negative coupon balance.
//!
//! This is a compensating controller, not a preventive guard: it tolerates
//! a temporary `bait_coupons < 0` and restores safety after the fact. It is
//! edge-triggered — it fires only when the *new* balance is negative and
//! differs from the previous one, so repeated reads of an already-negative,
//! unmutated value stay quiet. A change between two distinct negative
//! values does re-fire it; the correction is idempotent (clamp plus
//! counter overwrite), so the repeat converges to the same state.

use crate::error::HandlerError;
use crate::notify;
use stampledger_core::{
    Clock, DailyUsageCounter, DayKey, LedgerConfig, NotificationGateway, PushBatch, PushMessage,
    User,
};
use stampledger_store::LedgerStore;
use std::sync::Arc;

/// Reactive handler for user-updated events.
pub struct InvariantEnforcer {
    store: LedgerStore,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl InvariantEnforcer {
    /// Creates the enforcer with its injected dependencies.
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

    /// Handles one user-updated event.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Store`] if the corrective transaction
    /// exhausts its attempt budget or the store fails.
    pub async fn on_user_updated(&self, before: &User, after: &User) -> Result<(), HandlerError> {
        if after.bait_coupons >= 0 || after.bait_coupons == before.bait_coupons {
            return Ok(());
        }

        let today = DayKey::from_datetime(self.clock.now(), self.config.utc_offset_hours);
        let penalty = self.config.usage_penalty;
        let user_id = after.id.clone();
        let counter_key = (user_id.clone(), today.clone());

        let corrected = self
            .store
            .run_transaction(self.config.txn_max_attempts, |txn| {
                let Some(mut user) = txn.get_user(&user_id)? else {
                    return Ok(None);
                };
                // Re-read at commit freshness: a concurrent correction (or a
                // legitimate credit) may already have restored the invariant.
                if user.bait_coupons >= 0 {
                    return Ok(None);
                }

                let observed = user.bait_coupons;
                user.bait_coupons = 0;
                txn.put_user(user);
                // Overwrite, not increment: the penalty is a fixed reset.
                txn.put_counter(counter_key.clone(), DailyUsageCounter { used: penalty });
                Ok(Some(observed))
            })
            .await?;

        let Some(observed) = corrected else {
            tracing::debug!(user_id = %after.id, "Negative balance already healed, nothing to do");
            return Ok(());
        };

        metrics::counter!("enforcer.corrections").increment(1);
        tracing::warn!(user_id = %after.id, observed, penalty,
            "Negative coupon balance clamped to zero, usage penalty applied");

        self.notify_admins(after, observed).await;
        Ok(())
    }

    async fn notify_admins(&self, user: &User, observed: i64) {
        let tokens = match self.store.admins() {
            Ok(admins) => admins
                .iter()
                .filter_map(|admin| admin.push_token.clone())
                .collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!(error = %err, "Could not list admins for anomaly alert");
                return;
            }
        };

        let mut batch = PushBatch::new();
        batch.push(PushMessage::to_tokens(
            tokens,
            "Coupon balance anomaly corrected",
            format!(
                "User {} had a coupon balance of {observed}; it was reset to 0 and today's usage counter set to {}.",
                user.id, self.config.usage_penalty
            ),
        ));
        notify::dispatch_all(&self.gateway, self.config.notify_timeout, batch).await;
    }
}
