//! Trigger-event boundary.
//!
//! The delivery platform invokes handlers with before/after entity
//! snapshots and guarantees at-least-once delivery: a normal return
//! acknowledges the event, a propagated failure may cause redelivery.
//! [`LedgerHandlers::dispatch`] is that boundary. It routes each event to
//! the right handler, logs every failure per the error taxonomy, and
//! *always* acknowledges — an unexpected error drops the event rather than
//! risking an indefinite redelivery loop. The idempotency guards inside the
//! handlers are what make this policy safe, not the ack itself.

use crate::enforcer::InvariantEnforcer;
use crate::error::HandlerError;
use crate::fraud_gate::FraudGate;
use crate::stamp_engine::StampEngine;
use stampledger_core::{Clock, LedgerConfig, NotificationGateway, PointGrant, Stamp, User};
use stampledger_store::LedgerStore;
use std::sync::Arc;

/// A database change event as delivered by the trigger platform.
#[derive(Clone, Debug)]
pub enum TriggerEvent {
    /// A point grant document was created.
    GrantCreated {
        /// The created grant (the `after` snapshot).
        grant: PointGrant,
    },
    /// A user document was updated.
    UserUpdated {
        /// State before the update.
        before: User,
        /// State after the update.
        after: User,
    },
    /// A stamp document was created.
    StampCreated {
        /// The created stamp (the `after` snapshot).
        stamp: Stamp,
    },
}

impl TriggerEvent {
    const fn handler_name(&self) -> &'static str {
        match self {
            Self::GrantCreated { .. } => "fraud_gate",
            Self::UserUpdated { .. } => "invariant_enforcer",
            Self::StampCreated { .. } => "stamp_engine",
        }
    }
}

/// All three reactive handlers behind a single dispatch surface.
pub struct LedgerHandlers {
    fraud_gate: FraudGate,
    enforcer: InvariantEnforcer,
    stamp_engine: StampEngine,
}

impl LedgerHandlers {
    /// Wires up the handlers with shared dependencies.
    #[must_use]
    pub fn new(
        store: LedgerStore,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            fraud_gate: FraudGate::new(store.clone(), Arc::clone(&gateway), config.clone()),
            enforcer: InvariantEnforcer::new(
                store.clone(),
                Arc::clone(&gateway),
                Arc::clone(&clock),
                config.clone(),
            ),
            stamp_engine: StampEngine::new(store, gateway, clock, config),
        }
    }

    /// The fraud gate, for direct invocation in tests.
    #[must_use]
    pub const fn fraud_gate(&self) -> &FraudGate {
        &self.fraud_gate
    }

    /// The invariant enforcer, for direct invocation in tests.
    #[must_use]
    pub const fn enforcer(&self) -> &InvariantEnforcer {
        &self.enforcer
    }

    /// The stamp engine, for direct invocation in tests.
    #[must_use]
    pub const fn stamp_engine(&self) -> &StampEngine {
        &self.stamp_engine
    }

    /// Routes one event and acknowledges it regardless of outcome.
    pub async fn dispatch(&self, event: TriggerEvent) {
        let handler = event.handler_name();
        let result = match &event {
            TriggerEvent::GrantCreated { grant } => {
                self.fraud_gate.on_grant_created(grant.clone()).await
            }
            TriggerEvent::UserUpdated { before, after } => {
                self.enforcer.on_user_updated(before, after).await
            }
            TriggerEvent::StampCreated { stamp } => {
                self.stamp_engine.on_stamp_created(stamp.clone()).await
            }
        };

        match result {
            Ok(()) => {
                metrics::counter!("handler.completed", "handler" => handler).increment(1);
            }
            Err(HandlerError::MissingUser(user_id)) => {
                metrics::counter!("handler.dropped", "handler" => handler, "reason" => "missing_user")
                    .increment(1);
                tracing::error!(%user_id, handler, "Event dropped: referenced user absent");
            }
            Err(HandlerError::Store(err)) => {
                metrics::counter!("handler.dropped", "handler" => handler, "reason" => "store")
                    .increment(1);
                tracing::error!(error = %err, handler,
                    "Event dropped after handler failure; replay is safe under the idempotency guard");
            }
        }
    }
}
