//! # Stamp Ledger Testing
//!
//! Mocks and fixtures shared by the workspace's test suites:
//!
//! - deterministic [`mocks::FixedClock`]
//! - [`mocks::RecordingGateway`] capturing every push message
//! - [`mocks::FailingGateway`] for delivery-failure-isolation tests
//! - entity builders in [`fixtures`]

use chrono::{DateTime, TimeZone, Utc};
use stampledger_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use stampledger_core::{NotificationError, NotificationGateway, PushMessage};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making day keys and roster timestamps
    /// reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Gateway that records every message instead of delivering it.
    #[derive(Default)]
    pub struct RecordingGateway {
        sent: Arc<Mutex<Vec<PushMessage>>>,
    }

    impl RecordingGateway {
        /// Create an empty recording gateway.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All messages sent so far, in send order.
        ///
        /// # Panics
        ///
        /// Panics if a previous test holder poisoned the lock.
        #[must_use]
        #[allow(clippy::unwrap_used)] // Test code can unwrap
        pub fn sent(&self) -> Vec<PushMessage> {
            self.sent.lock().unwrap().clone()
        }

        /// Number of messages sent so far.
        #[must_use]
        pub fn sent_count(&self) -> usize {
            self.sent().len()
        }
    }

    impl NotificationGateway for RecordingGateway {
        fn send(
            &self,
            message: PushMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            let sent = Arc::clone(&self.sent);
            Box::pin(async move {
                sent.lock()
                    .map_err(|_| NotificationError::Transport("lock poisoned".to_string()))?
                    .push(message);
                Ok(())
            })
        }
    }

    /// Gateway that rejects every message, for verifying that delivery
    /// failures never escape a handler.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FailingGateway;

    impl NotificationGateway for FailingGateway {
        fn send(
            &self,
            _message: PushMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            Box::pin(async { Err(NotificationError::Rejected(500)) })
        }
    }
}

/// Entity builders for common test setups.
pub mod fixtures {
    use super::{DateTime, Utc};
    use stampledger_core::{GrantId, PointGrant, Stamp, StampId, StampMethod, User, UserId};
    use stampledger_store::LedgerStore;

    /// A plain user with zeroed balances.
    #[must_use]
    pub fn user(id: &str) -> User {
        User::new(UserId::new(id))
    }

    /// A user with a registered device token.
    #[must_use]
    pub fn user_with_token(id: &str, token: &str) -> User {
        let mut user = user(id);
        user.push_token = Some(token.to_string());
        user
    }

    /// An admin user with a registered device token.
    #[must_use]
    pub fn admin(id: &str, token: &str) -> User {
        let mut user = user_with_token(id, token);
        user.is_admin = true;
        user
    }

    /// An unprocessed QR stamp.
    #[must_use]
    pub fn qr_stamp(id: &str, user_id: &str, at: DateTime<Utc>) -> Stamp {
        Stamp::new(StampId::new(id), UserId::new(user_id), StampMethod::Qr, at)
    }

    /// An unprocessed administrative stamp.
    #[must_use]
    pub fn admin_stamp(id: &str, user_id: &str, at: DateTime<Utc>) -> Stamp {
        Stamp::new(StampId::new(id), UserId::new(user_id), StampMethod::Admin, at)
    }

    /// A timestamped point grant.
    #[must_use]
    pub fn grant(id: &str, user_id: &str, point: i64, at: DateTime<Utc>) -> PointGrant {
        PointGrant {
            id: GrantId::new(id),
            user_id: UserId::new(user_id),
            point,
            granted_at: Some(at),
        }
    }

    /// A store pre-seeded with the given users.
    ///
    /// # Panics
    ///
    /// Panics if the fresh store's lock is somehow poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test code can unwrap
    pub fn store_with_users(users: Vec<User>) -> LedgerStore {
        let store = LedgerStore::new();
        for user in users {
            store.upsert_user(user).unwrap();
        }
        store
    }
}

/// A fixed instant for tests: 2025-06-01 03:00:00 UTC (noon at UTC+9).
///
/// # Panics
///
/// Never panics in practice; the hardcoded timestamp is valid.
#[must_use]
#[allow(clippy::unwrap_used)] // Hardcoded valid timestamp
pub fn test_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap()
}

/// Installs a test tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FailingGateway, FixedClock, RecordingGateway};
