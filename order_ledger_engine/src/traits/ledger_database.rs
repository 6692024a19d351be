use chrono::{DateTime, Utc};
use ofl_common::Amount;
use thiserror::Error;

use crate::{
    db_types::{
        CriticalEvent,
        FinancialEvent,
        NewCriticalEvent,
        NewFinancialEvent,
        NewOrder,
        Order,
        OrderId,
        PaymentMethod,
        StatusHistoryEntry,
    },
    helpers::{Deadline, DeadlineExpired},
    online::OnlineTransaction,
    status::{StatusAction, StatusChange, StatusError, StatusMachine},
    traits::{ApplyOutcome, ProviderError},
};

/// This trait defines the behaviour a storage backend must supply to host
/// the order financial ledger.
///
/// Every mutating operation runs inside a single atomic transaction against
/// the order's persisted representation: the read of the current aggregate,
/// the validation and the write are observed together or not at all. The
/// `deadline` argument is checked at each suspension point so that work for
/// a caller who has already timed out is abandoned early.
#[allow(async_fn_in_trait)]
pub trait LedgerDatabase: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    /// Stores a new draft order and seeds its status history. Idempotent:
    /// returns the existing order and `false` if the order id is already
    /// known.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), LedgerError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError>;

    /// The order's full ledger, oldest first, voided entries included.
    async fn fetch_event_history(&self, order_id: &OrderId) -> Result<Vec<FinancialEvent>, LedgerError>;

    async fn fetch_status_history(&self, order_id: &OrderId) -> Result<Vec<StatusHistoryEntry>, LedgerError>;

    /// Presents a transaction to the ledger. In one atomic transaction:
    /// * if the transaction id is already recorded (non-voided), returns
    ///   [`ApplyOutcome::Duplicate`] without touching anything;
    /// * if `mark_as_failed` is set, performs only the pending
    ///   online-transaction cleanup and returns [`ApplyOutcome::FailureCleared`];
    /// * otherwise validates the amount guards, appends the event, recomputes
    ///   the derived financials, shrinks the pending online-transaction set if
    ///   the id was outstanding, and (when the order is already completed)
    ///   forwards the net-paid delta to the customer's total-spent aggregate.
    async fn apply_transaction(
        &self,
        event: NewFinancialEvent,
        mark_as_failed: bool,
        deadline: Deadline,
    ) -> Result<ApplyOutcome, LedgerError>;

    /// Flags a ledger event as voided and recomputes the aggregates. Voiding
    /// is not idempotent: a second void of the same event is a conflict.
    async fn void_event(
        &self,
        order_id: &OrderId,
        event_id: i64,
        note: Option<String>,
        deadline: Deadline,
    ) -> Result<(Order, FinancialEvent), LedgerError>;

    /// Validates `action` through the given status machine and records the
    /// resulting transition in the status history.
    async fn advance_order_status(
        &self,
        order_id: &OrderId,
        action: StatusAction,
        machine: &StatusMachine,
        deadline: Deadline,
    ) -> Result<(Order, StatusChange), LedgerError>;

    /// Replaces (or clears, with `None`) the order's pending online
    /// transaction record.
    async fn update_online_transaction(
        &self,
        order_id: &OrderId,
        tx: Option<OnlineTransaction>,
    ) -> Result<Order, LedgerError>;

    /// Orders whose pending online transaction is still in `init` and
    /// started at or before `cutoff`.
    async fn fetch_stuck_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, LedgerError>;

    /// Appends to the critical-events log for anomalies requiring manual
    /// review.
    async fn record_critical_event(&self, event: NewCriticalEvent) -> Result<CriticalEvent, LedgerError>;

    async fn fetch_critical_events(&self, order_id: &OrderId) -> Result<Vec<CriticalEvent>, LedgerError>;

    /// The customer's running total-spent aggregate.
    async fn customer_total_spent(&self, customer_id: &str) -> Result<Amount, LedgerError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Internal database engine error: {0}")]
    DatabaseError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested ledger event #{0} does not exist")]
    EventNotFound(i64),
    #[error("Ledger event #{0} has already been voided")]
    EventAlreadyVoided(i64),
    #[error("A transaction id is required for {0} transactions")]
    MissingTransactionId(PaymentMethod),
    #[error("Payment of {amount} would push the net paid amount ({net_paid}) past the order total of {total}")]
    PaymentExceedsOrderTotal { amount: Amount, net_paid: Amount, total: Amount },
    #[error("Refund of {amount} exceeds the net paid amount of {net_paid}")]
    RefundExceedsNetPaid { amount: Amount, net_paid: Amount },
    #[error("Illegal status transition. {0}")]
    StatusTransition(#[from] StatusError),
    #[error("{0}")]
    DeadlineExpired(#[from] DeadlineExpired),
    #[error("Order {0} has no pending online transaction")]
    NoOnlineTransaction(OrderId),
    #[error("Gateway error: {0}")]
    Gateway(#[from] ProviderError),
    #[error("The gateway record for order {0} is unusable: {1}")]
    UnusableGatewayRecord(OrderId, String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}
