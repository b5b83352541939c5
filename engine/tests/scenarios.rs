//! End-to-end scenarios for the three reactive handlers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use stampledger_core::{
    DayKey, GrantId, LedgerConfig, NotificationGateway, PushTarget, ScanOutcome, StampId,
    StampMethod, UserId,
};
use stampledger_engine::{FraudGate, InvariantEnforcer, LedgerHandlers, StampEngine, TriggerEvent};
use stampledger_store::LedgerStore;
use stampledger_testing::{fixtures, test_instant, FailingGateway, FixedClock, RecordingGateway};
use std::sync::Arc;

struct Harness {
    store: LedgerStore,
    gateway: Arc<RecordingGateway>,
    engine: StampEngine,
    fraud_gate: FraudGate,
    enforcer: InvariantEnforcer,
    day: DayKey,
}

fn harness() -> Harness {
    let store = LedgerStore::new();
    let gateway = Arc::new(RecordingGateway::new());
    let gateway_dyn: Arc<dyn NotificationGateway> = gateway.clone();
    let clock = Arc::new(FixedClock::new(test_instant()));
    let config = LedgerConfig::default();
    let day = DayKey::from_datetime(test_instant(), config.utc_offset_hours);

    Harness {
        engine: StampEngine::new(
            store.clone(),
            gateway_dyn.clone(),
            clock.clone(),
            config.clone(),
        ),
        fraud_gate: FraudGate::new(store.clone(), gateway_dyn.clone(), config.clone()),
        enforcer: InvariantEnforcer::new(store.clone(), gateway_dyn, clock, config),
        store,
        gateway,
        day,
    }
}

#[tokio::test]
async fn scenario_a_new_qr_visit() {
    let h = harness();
    h.store
        .upsert_user(fixtures::user_with_token("u-1", "tok-user"))
        .unwrap();
    h.store
        .upsert_user(fixtures::admin("a-1", "tok-admin"))
        .unwrap();

    let stamp = fixtures::qr_stamp("s-1", "u-1", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();

    h.engine.on_stamp_created(stamp).await.unwrap();

    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.bait_coupons, 1);
    assert_eq!(user.trip_count, 1);
    assert!(user.has_award_for(&StampId::new("s-1")));

    let roster = h.store.get_roster(&h.day).unwrap().unwrap();
    assert!(roster.contains(&UserId::new("u-1")));

    let settled = h.store.get_stamp(&StampId::new("s-1")).unwrap().unwrap();
    assert!(settled.processed_by_server);

    let entries = h.store.activity().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, ScanOutcome::Registered);
    assert_eq!(entries[0].stamp_id, Some(StampId::new("s-1")));

    // User message plus admin broadcast.
    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .any(|m| m.to == PushTarget::Token("tok-user".to_string())));
}

#[tokio::test]
async fn scenario_b_pre_registered_rollback() {
    let h = harness();
    let mut user = fixtures::user_with_token("u-1", "tok-user");
    user.bait_coupons = 1;
    user.trip_count = 3;
    h.store.upsert_user(user).unwrap();

    // Operator-confirmed manifest registered the visit first.
    h.store
        .add_roster_member(h.day.clone(), UserId::new("u-1"), test_instant())
        .unwrap();

    let stamp = fixtures::qr_stamp("s-2", "u-1", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();

    h.engine.on_stamp_created(stamp).await.unwrap();

    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.bait_coupons, 0, "automatic coupon revoked");
    assert_eq!(user.trip_count, 3, "no trip counted for a confirmed visit");
    assert!(!user.has_award_for(&StampId::new("s-2")));

    // Roster membership unchanged, stamp entity deleted.
    let roster = h.store.get_roster(&h.day).unwrap().unwrap();
    assert_eq!(roster.members.len(), 1);
    assert!(h.store.get_stamp(&StampId::new("s-2")).unwrap().is_none());

    let entries = h.store.activity().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, ScanOutcome::PreRegisteredRollback);
}

#[tokio::test]
async fn scenario_b_rollback_with_zero_balance_stays_zero() {
    let h = harness();
    h.store
        .upsert_user(fixtures::user_with_token("u-1", "tok-user"))
        .unwrap();
    h.store
        .add_roster_member(h.day.clone(), UserId::new("u-1"), test_instant())
        .unwrap();

    let stamp = fixtures::qr_stamp("s-2", "u-1", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();
    h.engine.on_stamp_created(stamp).await.unwrap();

    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.bait_coupons, 0);
}

#[tokio::test]
async fn scenario_c_self_healing_negative_balance() {
    let h = harness();
    h.store
        .upsert_user(fixtures::admin("a-1", "tok-admin"))
        .unwrap();

    let before = fixtures::user("u-1");
    let mut after = before.clone();
    after.bait_coupons = -3;
    // The corrupt balance is what the store holds when the event arrives.
    h.store.upsert_user(after.clone()).unwrap();

    h.enforcer.on_user_updated(&before, &after).await.unwrap();

    let healed = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(healed.bait_coupons, 0);

    let counter = h
        .store
        .get_counter(&(UserId::new("u-1"), h.day.clone()))
        .unwrap()
        .unwrap();
    assert_eq!(counter.used, 10, "penalty overwrites the counter");

    assert_eq!(h.gateway.sent_count(), 1, "admin broadcast only");
}

#[tokio::test]
async fn enforcer_is_edge_triggered() {
    let h = harness();
    let mut user = fixtures::user("u-1");
    user.bait_coupons = -2;
    h.store.upsert_user(user.clone()).unwrap();

    // Same negative value on both sides: a re-read, not a mutation.
    h.enforcer.on_user_updated(&user, &user).await.unwrap();

    let untouched = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(untouched.bait_coupons, -2, "level trigger must not fire");
    assert_eq!(h.gateway.sent_count(), 0);
}

#[tokio::test]
async fn enforcer_refires_between_distinct_negative_values() {
    let h = harness();
    let mut before = fixtures::user("u-1");
    before.bait_coupons = -2;
    let mut after = before.clone();
    after.bait_coupons = -5;
    h.store.upsert_user(after.clone()).unwrap();

    h.enforcer.on_user_updated(&before, &after).await.unwrap();

    let healed = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(healed.bait_coupons, 0);
}

#[tokio::test]
async fn scenario_d_fraud_gate_rejects_over_quota() {
    let h = harness();
    h.store
        .upsert_user(fixtures::user_with_token("u-1", "tok-user"))
        .unwrap();
    h.store
        .upsert_user(fixtures::admin("a-1", "tok-admin"))
        .unwrap();
    h.store
        .set_usage(UserId::new("u-1"), h.day.clone(), 25)
        .unwrap();

    let grant = fixtures::grant("g-1", "u-1", 50, test_instant());
    h.store.insert_grant(grant.clone()).unwrap();
    assert_eq!(
        h.store
            .get_user(&UserId::new("u-1"))
            .unwrap()
            .unwrap()
            .total_point,
        50
    );

    h.fraud_gate.on_grant_created(grant).await.unwrap();

    assert!(h.store.get_grant(&GrantId::new("g-1")).unwrap().is_none());
    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.total_point, 0, "reversal decrements by the grant value");

    // Cancellation to the user, fraud alert to admins.
    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|m| m.body.contains("usage 25")));
}

#[tokio::test]
async fn scenario_e_fraud_gate_accepts_at_quota() {
    let h = harness();
    h.store
        .upsert_user(fixtures::user_with_token("u-1", "tok-user"))
        .unwrap();
    h.store
        .set_usage(UserId::new("u-1"), h.day.clone(), 20)
        .unwrap();

    let grant = fixtures::grant("g-1", "u-1", 50, test_instant());
    h.store.insert_grant(grant.clone()).unwrap();

    h.fraud_gate.on_grant_created(grant).await.unwrap();

    assert!(h.store.get_grant(&GrantId::new("g-1")).unwrap().is_some());
    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.total_point, 50);
    assert_eq!(h.gateway.sent_count(), 0);
}

#[tokio::test]
async fn fraud_gate_accepts_when_no_counter_exists() {
    let h = harness();
    h.store.upsert_user(fixtures::user("u-1")).unwrap();

    let grant = fixtures::grant("g-1", "u-1", 10, test_instant());
    h.store.insert_grant(grant.clone()).unwrap();

    h.fraud_gate.on_grant_created(grant).await.unwrap();
    assert!(h.store.get_grant(&GrantId::new("g-1")).unwrap().is_some());
}

#[tokio::test]
async fn fraud_gate_skips_grants_without_timestamp() {
    let h = harness();
    h.store.upsert_user(fixtures::user("u-1")).unwrap();
    h.store
        .set_usage(UserId::new("u-1"), h.day.clone(), 25)
        .unwrap();

    let mut grant = fixtures::grant("g-1", "u-1", 10, test_instant());
    grant.granted_at = None;
    h.store.insert_grant(grant.clone()).unwrap();

    h.fraud_gate.on_grant_created(grant).await.unwrap();

    // Trusted grant: untouched despite the over-quota counter.
    assert!(h.store.get_grant(&GrantId::new("g-1")).unwrap().is_some());
}

#[tokio::test]
async fn admin_stamp_counts_trip_only() {
    let h = harness();
    h.store
        .upsert_user(fixtures::user_with_token("u-1", "tok-user"))
        .unwrap();

    let stamp = fixtures::admin_stamp("s-3", "u-1", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();
    h.engine.on_stamp_created(stamp).await.unwrap();

    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.trip_count, 1);
    assert_eq!(user.bait_coupons, 0);
    assert!(h.store.get_roster(&h.day).unwrap().is_none());
    assert!(
        h.store
            .get_stamp(&StampId::new("s-3"))
            .unwrap()
            .unwrap()
            .processed_by_server
    );
}

#[tokio::test]
async fn unknown_method_settles_as_anomaly() {
    let h = harness();
    h.store.upsert_user(fixtures::user("u-1")).unwrap();

    let mut stamp = fixtures::qr_stamp("s-4", "u-1", test_instant());
    stamp.method = StampMethod::Unknown;
    h.store.insert_stamp(stamp.clone()).unwrap();
    h.engine.on_stamp_created(stamp).await.unwrap();

    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.trip_count, 0);
    assert_eq!(user.bait_coupons, 0);
    assert!(
        h.store
            .get_stamp(&StampId::new("s-4"))
            .unwrap()
            .unwrap()
            .processed_by_server
    );

    let entries = h.store.activity().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, ScanOutcome::Anomaly);
}

#[tokio::test]
async fn missing_user_settles_stamp_defensively() {
    let h = harness();
    let stamp = fixtures::qr_stamp("s-5", "ghost", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();

    h.engine.on_stamp_created(stamp).await.unwrap();

    assert!(
        h.store
            .get_stamp(&StampId::new("s-5"))
            .unwrap()
            .unwrap()
            .processed_by_server
    );
    assert!(h.store.activity().is_empty(), "no audit entry without a user");
    assert_eq!(h.gateway.sent_count(), 0);
}

#[tokio::test]
async fn replaying_the_same_scan_event_is_idempotent() {
    let h = harness();
    h.store
        .upsert_user(fixtures::user_with_token("u-1", "tok-user"))
        .unwrap();

    let stamp = fixtures::qr_stamp("s-1", "u-1", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();

    h.engine.on_stamp_created(stamp.clone()).await.unwrap();
    // At-least-once delivery: the identical event arrives again, still
    // carrying the stale unprocessed snapshot.
    h.engine.on_stamp_created(stamp).await.unwrap();

    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.bait_coupons, 1);
    assert_eq!(user.trip_count, 1);
    assert_eq!(
        h.store.activity().len(),
        1,
        "one audit entry per processed event, not per delivery"
    );
}

#[tokio::test]
async fn replaying_a_rollback_scan_is_idempotent_despite_deletion() {
    let h = harness();
    let mut user = fixtures::user("u-1");
    user.bait_coupons = 2;
    h.store.upsert_user(user).unwrap();
    h.store
        .add_roster_member(h.day.clone(), UserId::new("u-1"), test_instant())
        .unwrap();

    let stamp = fixtures::qr_stamp("s-2", "u-1", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();

    h.engine.on_stamp_created(stamp.clone()).await.unwrap();
    h.engine.on_stamp_created(stamp).await.unwrap();

    // Without the idempotency registry the second delivery would revoke a
    // second coupon: the stamp entity is gone and carries no flag.
    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.bait_coupons, 1);
    assert_eq!(h.store.activity().len(), 1);
}

#[tokio::test]
async fn concurrent_deliveries_of_one_event_settle_once() {
    let h = harness();
    h.store.upsert_user(fixtures::user("u-1")).unwrap();

    let stamp = fixtures::qr_stamp("s-1", "u-1", test_instant());
    h.store.insert_stamp(stamp.clone()).unwrap();

    let engine = Arc::new(h.engine);
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let stamp = stamp.clone();
        tasks.push(tokio::spawn(async move {
            engine.on_stamp_created(stamp).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let user = h.store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.bait_coupons, 1);
    assert_eq!(user.trip_count, 1);
    assert_eq!(h.store.activity().len(), 1);
}

#[tokio::test]
async fn notification_failure_never_affects_the_ledger() {
    let store = LedgerStore::new();
    let gateway: Arc<dyn NotificationGateway> = Arc::new(FailingGateway);
    let clock = Arc::new(FixedClock::new(test_instant()));
    let engine = StampEngine::new(
        store.clone(),
        gateway,
        clock,
        LedgerConfig::default(),
    );

    store
        .upsert_user(fixtures::user_with_token("u-1", "tok-user"))
        .unwrap();
    let stamp = fixtures::qr_stamp("s-1", "u-1", test_instant());
    store.insert_stamp(stamp.clone()).unwrap();

    engine.on_stamp_created(stamp).await.unwrap();

    let user = store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.bait_coupons, 1);
    assert_eq!(store.activity().len(), 1);
}

#[tokio::test]
async fn dispatch_routes_and_always_acks() {
    let store = LedgerStore::new();
    let gateway: Arc<dyn NotificationGateway> = Arc::new(RecordingGateway::new());
    let clock = Arc::new(FixedClock::new(test_instant()));
    let handlers = LedgerHandlers::new(store.clone(), gateway, clock, LedgerConfig::default());

    store.upsert_user(fixtures::user("u-1")).unwrap();
    let stamp = fixtures::qr_stamp("s-1", "u-1", test_instant());
    store.insert_stamp(stamp.clone()).unwrap();

    handlers.dispatch(TriggerEvent::StampCreated { stamp }).await;

    // A grant owned by a missing user is a terminal error inside the
    // handler, but the boundary still completes normally.
    handlers
        .dispatch(TriggerEvent::GrantCreated {
            grant: fixtures::grant("g-9", "nobody", 10, test_instant()),
        })
        .await;

    let user = store.get_user(&UserId::new("u-1")).unwrap().unwrap();
    assert_eq!(user.trip_count, 1);
}
