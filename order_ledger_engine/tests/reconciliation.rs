//! End-to-end tests for the reconciliation scheduler: abandoned attempts,
//! partial resolution, draft-order anomalies and provider partitioning.
mod support;

use std::sync::Arc;

use chrono::{Duration, Utc};
use ofl_common::Amount;
use order_ledger_engine::{
    db_types::{CriticalReason, DeliveryMethod, FinancialState, OrderStatus, ProviderTag},
    online::OnlineTransactionStatus,
    reconciliation::{ReconciliationConfig, ReconciliationScheduler},
    traits::{LedgerDatabase, ProviderAdapter, ProviderRegistry},
    SqliteDatabase,
};
use support::{advance_through, api_for, norm_payment, pending_tx, prepare_db, seeded_order, FakeProviderAdapter, ManualClock};

fn scheduler_with(
    db: SqliteDatabase,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    clock: Arc<ManualClock>,
) -> ReconciliationScheduler<SqliteDatabase> {
    let mut registry = ProviderRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    ReconciliationScheduler::new(api_for(db), registry, clock, ReconciliationConfig::default())
}

#[tokio::test]
async fn abandoned_attempts_are_cleared_without_ledger_entries() {
    let db = prepare_db().await;
    let api = api_for(db.clone());
    let now = Utc::now();

    // stuck for 31 minutes against a 30 minute window
    let stuck = seeded_order(&api, "SO-3001", 1000.0, DeliveryMethod::SelfPickup).await;
    advance_through(&api, &stuck.order_id, &[OrderStatus::Confirmed]).await;
    db.update_online_transaction(&stuck.order_id, Some(pending_tx(&["tx2"], now - Duration::minutes(31))))
        .await
        .unwrap();
    // a younger attempt that must be left alone
    let fresh = seeded_order(&api, "SO-3001b", 1000.0, DeliveryMethod::SelfPickup).await;
    advance_through(&api, &fresh.order_id, &[OrderStatus::Confirmed]).await;
    db.update_online_transaction(&fresh.order_id, Some(pending_tx(&["tx9"], now - Duration::minutes(10))))
        .await
        .unwrap();

    let gateway = Arc::new(FakeProviderAdapter::new(ProviderTag::Yookassa));
    let scheduler = scheduler_with(db.clone(), vec![gateway], ManualClock::at(now));
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.stuck_orders, 1);
    assert_eq!(summary.cleared, 1);
    assert_eq!(summary.matched_transactions, 0);
    assert_eq!(summary.failures, 0);

    let stuck = db.fetch_order(&stuck.order_id).await.unwrap().unwrap();
    assert!(stuck.current_online_tx.is_none());
    assert!(db.fetch_event_history(&stuck.order_id).await.unwrap().is_empty());
    let fresh = db.fetch_order(&fresh.order_id).await.unwrap().unwrap();
    assert!(fresh.current_online_tx.is_some(), "orders inside the window must not be touched");
}

#[tokio::test]
async fn partial_resolution_applies_finished_ids_and_keeps_the_rest_pending() {
    let db = prepare_db().await;
    let api = api_for(db.clone());
    let now = Utc::now();

    let order = seeded_order(&api, "SO-3002", 1000.0, DeliveryMethod::SelfPickup).await;
    advance_through(&api, &order.order_id, &[OrderStatus::Confirmed]).await;
    db.update_online_transaction(&order.order_id, Some(pending_tx(&["tx3", "tx4"], now - Duration::minutes(40))))
        .await
        .unwrap();

    let gateway = Arc::new(FakeProviderAdapter::new(ProviderTag::Yookassa).with_normalized(&[
        norm_payment("SO-3002", "tx3", 500.0, true),
        norm_payment("SO-3002", "tx4", 500.0, false),
    ]));
    let scheduler = scheduler_with(db.clone(), vec![gateway], ManualClock::at(now));
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.stuck_orders, 1);
    assert_eq!(summary.matched_transactions, 2);
    assert_eq!(summary.applied, 1);

    let order = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    let history = db.fetch_event_history(&order.order_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, Amount::from(500.0));
    assert_eq!(order.financial_state, FinancialState::PartiallyPaid);
    let pending = order.current_online_tx.as_ref().expect("tx4 is still outstanding");
    assert_eq!(pending.transaction_ids, vec!["tx4".to_string()]);
    assert_eq!(pending.status, OnlineTransactionStatus::Processing);

    // a processing record is no longer stuck, so the next tick has nothing to do
    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.stuck_orders, 0);
    assert_eq!(db.fetch_event_history(&order.order_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stuck_transactions_on_draft_orders_are_flagged_not_applied() {
    let db = prepare_db().await;
    let api = api_for(db.clone());
    let now = Utc::now();

    // a draft order should never have started a gateway round-trip
    let order = seeded_order(&api, "SO-3003", 1000.0, DeliveryMethod::SelfPickup).await;
    db.update_online_transaction(&order.order_id, Some(pending_tx(&["tx5"], now - Duration::minutes(35))))
        .await
        .unwrap();

    let gateway = Arc::new(
        FakeProviderAdapter::new(ProviderTag::Yookassa).with_normalized(&[norm_payment("SO-3003", "tx5", 1000.0, true)]),
    );
    let scheduler = scheduler_with(db.clone(), vec![gateway], ManualClock::at(now));
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.flagged, 1);
    assert_eq!(summary.applied, 0);
    let order = db.fetch_order(&order.order_id).await.unwrap().unwrap();
    assert!(order.current_online_tx.is_none());
    assert!(db.fetch_event_history(&order.order_id).await.unwrap().is_empty());
    let critical = db.fetch_critical_events(&order.order_id).await.unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].reason, CriticalReason::StuckTransactionOnDraftOrder);
}

#[tokio::test]
async fn unusable_gateway_records_are_parked_for_review() {
    let db = prepare_db().await;
    let api = api_for(db.clone());
    let now = Utc::now();

    let order = seeded_order(&api, "SO-3004", 1000.0, DeliveryMethod::SelfPickup).await;
    advance_through(&api, &order.order_id, &[OrderStatus::Confirmed]).await;
    db.update_online_transaction(&order.order_id, Some(pending_tx(&["tx6"], now - Duration::minutes(35))))
        .await
        .unwrap();

    let gateway =
        Arc::new(FakeProviderAdapter::new(ProviderTag::Yookassa).with_external(vec![serde_json::json!({ "garbage": true })]));
    let scheduler = scheduler_with(db.clone(), vec![gateway], ManualClock::at(now));
    let summary = scheduler.tick().await.unwrap();

    // the record was flagged, and with no usable match the order counts as abandoned
    assert_eq!(summary.matched_transactions, 0);
    assert_eq!(summary.cleared, 1);
    assert_eq!(summary.failures, 0);
    let flagged: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM critical_events WHERE reason = 'malformed-external-transaction'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(flagged, 1);
}

#[tokio::test]
async fn stuck_orders_are_partitioned_across_their_providers() {
    let db = prepare_db().await;
    let api = api_for(db.clone());
    let now = Utc::now();

    let first = seeded_order(&api, "SO-3005", 1000.0, DeliveryMethod::SelfPickup).await;
    advance_through(&api, &first.order_id, &[OrderStatus::Confirmed]).await;
    db.update_online_transaction(&first.order_id, Some(pending_tx(&["y1"], now - Duration::minutes(35))))
        .await
        .unwrap();

    let second = seeded_order(&api, "SO-3006", 1000.0, DeliveryMethod::SelfPickup).await;
    advance_through(&api, &second.order_id, &[OrderStatus::Confirmed]).await;
    let mut cloud_pending = pending_tx(&["c1"], now - Duration::minutes(35));
    cloud_pending.providers = vec![ProviderTag::CloudPayments];
    db.update_online_transaction(&second.order_id, Some(cloud_pending)).await.unwrap();

    let yookassa = Arc::new(
        FakeProviderAdapter::new(ProviderTag::Yookassa).with_normalized(&[norm_payment("SO-3005", "y1", 1000.0, true)]),
    );
    let mut cloud_match = norm_payment("SO-3006", "c1", 1000.0, true);
    cloud_match.provider = ProviderTag::CloudPayments;
    let cloud = Arc::new(FakeProviderAdapter::new(ProviderTag::CloudPayments).with_normalized(&[cloud_match]));

    let scheduler = scheduler_with(db.clone(), vec![yookassa.clone(), cloud.clone()], ManualClock::at(now));
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.stuck_orders, 2);
    assert_eq!(summary.applied, 2);
    assert_eq!(yookassa.fetch_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(cloud.fetch_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    for order_id in [&first.order_id, &second.order_id] {
        let order = db.fetch_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.financial_state, FinancialState::Paid);
        assert!(order.current_online_tx.is_none());
    }
}
