//! `SqliteDatabase` is the concrete storage backend for the order financial
//! ledger. It implements [`LedgerDatabase`] on top of a SQLite pool, with
//! every mutating operation wrapped in one database transaction so the read,
//! the validation and the write commit or roll back as a unit.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use ofl_common::Amount;
use sqlx::{SqliteConnection, SqlitePool};

use super::db::{critical_events, customers, db_url, ledger_events, new_pool, orders, status_history};
use crate::{
    db_types::{
        CriticalEvent,
        EventKind,
        FinancialEvent,
        NewCriticalEvent,
        NewFinancialEvent,
        NewOrder,
        Order,
        OrderId,
        OrderStatus,
        StatusHistoryEntry,
    },
    financials::compute_financials,
    helpers::Deadline,
    status::{StatusAction, StatusChange, StatusMachine},
    traits::{ApplyOutcome, LedgerDatabase, LedgerError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl LedgerDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (order, inserted) = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        if inserted {
            debug!("🗃️ Order {} has been saved in the DB with id {}", order.order_id, order.id);
        } else {
            debug!("🗃️ Order {} already exists with id {}. Nothing inserted.", order.order_id, order.id);
        }
        Ok((order, inserted))
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_order_id(order_id, &mut conn).await
    }

    async fn fetch_event_history(&self, order_id: &OrderId) -> Result<Vec<FinancialEvent>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;
        ledger_events::events_for_order(order.id, &mut conn).await
    }

    async fn fetch_status_history(&self, order_id: &OrderId) -> Result<Vec<StatusHistoryEntry>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;
        status_history::history_for_order(order.id, &mut conn).await
    }

    async fn apply_transaction(
        &self,
        event: NewFinancialEvent,
        mark_as_failed: bool,
        deadline: Deadline,
    ) -> Result<ApplyOutcome, LedgerError> {
        deadline.check()?;
        let mut tx = self.pool.begin().await?;
        let mut order = orders::fetch_order_by_order_id(&event.order_id, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(event.order_id.clone()))?;
        if event.transaction_id.is_none() && event.method.requires_transaction_id() {
            return Err(LedgerError::MissingTransactionId(event.method));
        }
        deadline.check()?;

        // Idempotency: re-presenting a recorded id is a success no-op. The
        // pending attempt still gets resolved, because the duplicate may be a
        // webhook arriving after reconciliation already fixed the order.
        if let Some(txid) = event.transaction_id.as_deref() {
            if let Some(existing) = ledger_events::find_active_by_transaction_id(order.id, txid, &mut tx).await? {
                trace!(
                    "🗃️ Transaction [{txid}] is already event #{} on order {}. No-op.",
                    existing.id,
                    order.order_id
                );
                resolve_pending_attempt(&mut order, txid, &mut tx).await?;
                tx.commit().await?;
                return Ok(ApplyOutcome::Duplicate { order });
            }
        }

        if mark_as_failed {
            if let Some(txid) = event.transaction_id.as_deref() {
                resolve_pending_attempt(&mut order, txid, &mut tx).await?;
            }
            tx.commit().await?;
            debug!(
                "🗃️ Gateway reported failure for [{}] on order {}. Pending attempt cleaned up, no ledger entry.",
                event.transaction_id.as_deref().unwrap_or("-"),
                order.order_id
            );
            return Ok(ApplyOutcome::FailureCleared { order });
        }

        let history = ledger_events::events_for_order(order.id, &mut tx).await?;
        let net_paid = compute_financials(&history, order.status, order.total_amount).net_paid();
        match event.kind {
            EventKind::Payment => {
                if !event.method.allows_overpayment() && (net_paid + event.amount).exceeds(order.total_amount) {
                    return Err(LedgerError::PaymentExceedsOrderTotal {
                        amount: event.amount,
                        net_paid,
                        total: order.total_amount,
                    });
                }
            },
            EventKind::Refund => {
                if event.amount.exceeds(net_paid) {
                    return Err(LedgerError::RefundExceedsNetPaid { amount: event.amount, net_paid });
                }
            },
        }
        deadline.check()?;

        let stored = ledger_events::insert(order.id, &event, &mut tx).await?;
        let mut history = history;
        history.push(stored.clone());
        let summary = compute_financials(&history, order.status, order.total_amount);
        orders::update_financials(order.id, &summary, &mut tx).await?;
        order.financial_state = summary.state;
        order.total_paid = summary.total_paid;
        order.total_refunded = summary.total_refunded;

        if let Some(txid) = stored.transaction_id.as_deref() {
            resolve_pending_attempt(&mut order, txid, &mut tx).await?;
        }

        // The one effect outside the order itself: completed orders forward
        // their net-paid delta to the customer's running total.
        if order.status == OrderStatus::Completed {
            let delta = stored.kind.signed(stored.amount);
            customers::adjust_total_spent(&order.customer_id, delta, &mut tx).await?;
            trace!("🗃️ Adjusted total spent for customer {} by {delta}", order.customer_id);
        }
        tx.commit().await?;
        debug!(
            "🗃️ {} of {} recorded on order {}. Net paid is now {}.",
            stored.kind,
            stored.amount,
            order.order_id,
            order.net_paid()
        );
        Ok(ApplyOutcome::Applied { order, event: stored })
    }

    async fn void_event(
        &self,
        order_id: &OrderId,
        event_id: i64,
        note: Option<String>,
        deadline: Deadline,
    ) -> Result<(Order, FinancialEvent), LedgerError> {
        deadline.check()?;
        let mut tx = self.pool.begin().await?;
        let mut order = orders::fetch_order_by_order_id(order_id, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;
        let event = ledger_events::fetch_event(order.id, event_id, &mut tx)
            .await?
            .ok_or(LedgerError::EventNotFound(event_id))?;
        if event.voided {
            // Voiding twice is a caller mistake, not a retry.
            return Err(LedgerError::EventAlreadyVoided(event_id));
        }
        deadline.check()?;
        let voided = ledger_events::mark_voided(event_id, note.as_deref(), &mut tx).await?;
        let history = ledger_events::events_for_order(order.id, &mut tx).await?;
        let summary = compute_financials(&history, order.status, order.total_amount);
        orders::update_financials(order.id, &summary, &mut tx).await?;
        order.financial_state = summary.state;
        order.total_paid = summary.total_paid;
        order.total_refunded = summary.total_refunded;
        if order.status == OrderStatus::Completed {
            let delta = -voided.kind.signed(voided.amount);
            customers::adjust_total_spent(&order.customer_id, delta, &mut tx).await?;
        }
        tx.commit().await?;
        info!("🗃️ Event #{event_id} on order {} voided. Net paid is now {}.", order.order_id, order.net_paid());
        Ok((order, voided))
    }

    async fn advance_order_status(
        &self,
        order_id: &OrderId,
        action: StatusAction,
        machine: &StatusMachine,
        deadline: Deadline,
    ) -> Result<(Order, StatusChange), LedgerError> {
        deadline.check()?;
        let mut tx = self.pool.begin().await?;
        let mut order = orders::fetch_order_by_order_id(order_id, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;
        let history = ledger_events::events_for_order(order.id, &mut tx).await?;
        let net_paid = compute_financials(&history, order.status, order.total_amount).net_paid();
        let change = machine.evaluate(&order, net_paid, action)?;
        deadline.check()?;
        status_history::append(order.id, change.to, change.last_active_status, &mut tx).await?;
        orders::update_status(order.id, change.to, &mut tx).await?;
        order.status = change.to;
        // The derived state depends on the status (cancelled orders report
        // refund progress), so recompute after the transition.
        let summary = compute_financials(&history, order.status, order.total_amount);
        orders::update_financials(order.id, &summary, &mut tx).await?;
        order.financial_state = summary.state;
        tx.commit().await?;
        debug!("🗃️ Order {} moved from {} to {}", order.order_id, change.from, change.to);
        Ok((order, change))
    }

    async fn update_online_transaction(
        &self,
        order_id: &OrderId,
        tx_record: Option<crate::online::OnlineTransaction>,
    ) -> Result<Order, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let mut order = orders::fetch_order_by_order_id(order_id, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;
        orders::store_online_tx(order.id, tx_record.as_ref(), &mut tx).await?;
        order.current_online_tx = tx_record;
        tx.commit().await?;
        Ok(order)
    }

    async fn fetch_stuck_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_stuck_orders(cutoff, &mut conn).await
    }

    async fn record_critical_event(&self, event: NewCriticalEvent) -> Result<CriticalEvent, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let stored = critical_events::insert(event, &mut conn).await?;
        error!(
            "🚨️ Critical event #{} recorded ({}) for order {}. Manual review required.",
            stored.id,
            stored.reason,
            stored.order_id.as_ref().map(|o| o.to_string()).unwrap_or_else(|| "<unknown>".to_string())
        );
        Ok(stored)
    }

    async fn fetch_critical_events(&self, order_id: &OrderId) -> Result<Vec<CriticalEvent>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        critical_events::events_for_order(order_id, &mut conn).await
    }

    async fn customer_total_spent(&self, customer_id: &str) -> Result<Amount, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        customers::total_spent(customer_id, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Shrinks the order's pending online-transaction set by one resolved id,
/// clearing the record the instant the set empties. Returns whether anything
/// changed.
async fn resolve_pending_attempt(
    order: &mut Order,
    transaction_id: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let Some(mut pending) = order.current_online_tx.clone() else {
        return Ok(false);
    };
    if !pending.resolve(transaction_id) {
        return Ok(false);
    }
    let updated = if pending.is_cleared() { None } else { Some(pending) };
    orders::store_online_tx(order.id, updated.as_ref(), conn).await?;
    if updated.is_none() {
        trace!("🗃️ Pending online transaction on order {} fully resolved and cleared", order.order_id);
    }
    order.current_online_tx = updated;
    Ok(true)
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL from the environment.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Applies any outstanding schema migrations.
    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(format!("Migration failed: {e}")))?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
