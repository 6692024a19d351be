#![allow(dead_code)]
//! Shared plumbing for the engine integration tests: throwaway SQLite
//! databases, a manual clock, and a programmable fake gateway adapter.
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use ofl_common::Amount;
use order_ledger_engine::{
    db_types::{DeliveryMethod, EventKind, NewOrder, Order, OrderId, OrderStatus, ProviderTag},
    events::EventProducers,
    helpers::Deadline,
    online::{OnlineTransaction, OnlineTransactionStatus},
    reconciliation::Clock,
    status::{StatusAction, StatusMachine},
    traits::{
        CreatePaymentRequest,
        NormalizedTransaction,
        PaymentInit,
        ProviderAdapter,
        ProviderError,
        RefundBatchOutcome,
        RefundTask,
        StuckOrderRef,
    },
    OrderFlowApi,
    SqliteDatabase,
};
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, Sqlite};

pub fn random_db_url() -> String {
    format!("sqlite://{}/ofl_test_{}.sqlite", std::env::temp_dir().display(), rand::random::<u64>())
}

pub async fn create_database(url: &str) {
    if let Err(e) = Sqlite::drop_database(url).await {
        warn!("Error dropping database {url}: {e:?}");
    }
    Sqlite::create_database(url).await.expect("Error creating database");
}

/// A fresh, migrated, throwaway database for one test.
pub async fn prepare_db() -> SqliteDatabase {
    dotenvy::dotenv().ok();
    let _ = env_logger::try_init();
    let url = random_db_url();
    create_database(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
    db.run_migrations().await.expect("Error running DB migrations");
    db
}

/// An api over the given database with no minimum order amount and no
/// fanout subscribers.
pub fn api_for(db: SqliteDatabase) -> OrderFlowApi<SqliteDatabase> {
    OrderFlowApi::new(db, StatusMachine::new(Amount::ZERO), EventProducers::default())
}

pub async fn seeded_order(
    api: &OrderFlowApi<SqliteDatabase>,
    order_id: &str,
    total: f64,
    method: DeliveryMethod,
) -> Order {
    let new_order = NewOrder::new(OrderId::from(order_id), "cust-1".to_string(), Amount::from(total), method);
    let (order, inserted) = api.submit_order(new_order).await.expect("Error submitting order");
    assert!(inserted, "order {order_id} already existed");
    order
}

/// Walks the order forward through the given statuses, one NEXT at a time.
pub async fn advance_through(api: &OrderFlowApi<SqliteDatabase>, order_id: &OrderId, statuses: &[OrderStatus]) -> Order {
    let mut order = api.fetch_order(order_id).await.expect("Error fetching order");
    for status in statuses {
        let (updated, _) = api
            .advance_status(order_id, StatusAction::Next(*status), Deadline::unbounded())
            .await
            .unwrap_or_else(|e| panic!("Could not advance {order_id} to {status}: {e}"));
        order = updated;
    }
    order
}

/// A pending online transaction with a backdated start, as an interrupted
/// checkout would leave behind.
pub fn pending_tx(ids: &[&str], started_at: DateTime<Utc>) -> OnlineTransaction {
    OnlineTransaction {
        kind: EventKind::Payment,
        status: OnlineTransactionStatus::Init,
        providers: vec![ProviderTag::Yookassa],
        transaction_ids: ids.iter().map(|s| s.to_string()).collect(),
        started_at,
        confirmation_url: None,
    }
}

pub fn norm_payment(order_id: &str, txid: &str, amount: f64, finished: bool) -> NormalizedTransaction {
    NormalizedTransaction {
        provider: ProviderTag::Yookassa,
        kind: EventKind::Payment,
        transaction_id: txid.to_string(),
        original_payment_id: None,
        amount: Amount::from(amount),
        finished,
        mark_as_failed: false,
        confirmation_url: None,
        order_id: Some(OrderId::from(order_id)),
    }
}

//--------------------------------------     ManualClock      --------------------------------------------------------
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(now) })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

//--------------------------------------  FakeProviderAdapter  -------------------------------------------------------
/// A programmable in-memory gateway. Its raw records are serialized
/// [`NormalizedTransaction`]s, so `normalize_external` is just a parse.
pub struct FakeProviderAdapter {
    tag: ProviderTag,
    external: Mutex<Vec<Value>>,
    payment_counter: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl FakeProviderAdapter {
    pub fn new(tag: ProviderTag) -> Self {
        Self { tag, external: Mutex::new(Vec::new()), payment_counter: AtomicUsize::new(0), fetch_calls: AtomicUsize::new(0) }
    }

    pub fn with_external(self, records: Vec<Value>) -> Self {
        *self.external.lock().unwrap() = records;
        self
    }

    pub fn with_normalized(self, records: &[NormalizedTransaction]) -> Self {
        let raw = records.iter().map(|r| serde_json::to_value(r).unwrap()).collect();
        self.with_external(raw)
    }

    pub fn push_external(&self, record: Value) {
        self.external.lock().unwrap().push(record);
    }
}

#[async_trait]
impl ProviderAdapter for FakeProviderAdapter {
    fn tag(&self) -> ProviderTag {
        self.tag
    }

    async fn create_payment(&self, _request: &CreatePaymentRequest) -> Result<PaymentInit, ProviderError> {
        let n = self.payment_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentInit {
            payment_id: format!("fake-{n}"),
            confirmation_url: Some(format!("https://pay.example/confirm/{n}")),
        })
    }

    async fn create_refund(&self, tasks: &[RefundTask]) -> RefundBatchOutcome {
        let mut outcome = RefundBatchOutcome::default();
        for task in tasks {
            outcome.refund_ids.push(format!("refund-{}", task.payment_id));
        }
        outcome
    }

    fn verify_webhook_authenticity(&self, _remote_ip: IpAddr) -> bool {
        true
    }

    fn normalize_webhook(&self, payload: &Value) -> Option<NormalizedTransaction> {
        serde_json::from_value(payload.clone()).ok()
    }

    async fn fetch_external(&self, _stuck: &[StuckOrderRef], _since: DateTime<Utc>) -> Result<Vec<Value>, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.external.lock().unwrap().clone())
    }

    fn normalize_external(&self, raw: &Value) -> Result<NormalizedTransaction, ProviderError> {
        serde_json::from_value(raw.clone()).map_err(|e| ProviderError::MissingField(e.to_string()))
    }
}
