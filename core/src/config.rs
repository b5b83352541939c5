//! Ledger configuration.
//!
//! All externally overridable constants live here and are injected into each
//! handler at construction, rather than read from globals. Deployment-level
//! loading (env, files) is out of scope; callers build a [`LedgerConfig`]
//! however they like and hand it over.

use std::time::Duration;

/// Configuration shared by all handlers.
///
/// # Default values
///
/// - `region`: `"asia-northeast1"`
/// - `daily_quota`: 20 (grants are rejected only when the day's usage is
///   *strictly above* this)
/// - `usage_penalty`: 10 (the value a corrective reset *overwrites* the
///   daily counter with)
/// - `utc_offset_hours`: +9
/// - `txn_max_attempts`: 5
/// - `notify_timeout`: 5 seconds
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Deployment region identifier, carried into logs.
    pub region: String,
    /// Per-user, per-day usage quota for the fraud gate.
    pub daily_quota: u32,
    /// Value the invariant enforcer writes into the day's usage counter.
    pub usage_penalty: u32,
    /// Offset applied when deriving calendar-day keys.
    pub utc_offset_hours: i32,
    /// Attempt budget for the optimistic transaction retry loop.
    pub txn_max_attempts: u32,
    /// Per-call timeout for push gateway sends.
    pub notify_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            region: "asia-northeast1".to_string(),
            daily_quota: 20,
            usage_penalty: 10,
            utc_offset_hours: 9,
            txn_max_attempts: 5,
            notify_timeout: Duration::from_secs(5),
        }
    }
}

impl LedgerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> LedgerConfigBuilder {
        LedgerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`LedgerConfig`].
#[derive(Debug, Clone)]
pub struct LedgerConfigBuilder {
    config: LedgerConfig,
}

impl LedgerConfigBuilder {
    /// Set the deployment region identifier.
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = region.into();
        self
    }

    /// Set the per-day usage quota.
    #[must_use]
    pub fn daily_quota(mut self, quota: u32) -> Self {
        self.config.daily_quota = quota;
        self
    }

    /// Set the corrective usage penalty.
    #[must_use]
    pub fn usage_penalty(mut self, penalty: u32) -> Self {
        self.config.usage_penalty = penalty;
        self
    }

    /// Set the UTC offset used for day keying.
    #[must_use]
    pub fn utc_offset_hours(mut self, hours: i32) -> Self {
        self.config.utc_offset_hours = hours;
        self
    }

    /// Set the transaction attempt budget.
    #[must_use]
    pub fn txn_max_attempts(mut self, attempts: u32) -> Self {
        self.config.txn_max_attempts = attempts;
        self
    }

    /// Set the per-call push gateway timeout.
    #[must_use]
    pub fn notify_timeout(mut self, timeout: Duration) -> Self {
        self.config.notify_timeout = timeout;
        self
    }

    /// Build the [`LedgerConfig`].
    #[must_use]
    pub fn build(self) -> LedgerConfig {
        self.config
    }
}
