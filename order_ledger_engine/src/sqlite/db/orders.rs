use chrono::{DateTime, Utc};
use log::debug;
use ofl_common::Amount;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatus},
    financials::FinancialSummary,
    online::OnlineTransaction,
    sqlite::db::status_history,
    traits::LedgerError,
};

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    order_id: String,
    customer_id: String,
    total_amount: f64,
    delivery_method: String,
    status: String,
    financial_state: String,
    total_paid: f64,
    total_refunded: f64,
    online_tx: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(field: &str, detail: impl std::fmt::Display) -> LedgerError {
    LedgerError::DatabaseError(format!("Corrupt order row ({field}): {detail}"))
}

impl TryFrom<OrderRow> for Order {
    type Error = LedgerError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let current_online_tx = row
            .online_tx
            .map(|json| serde_json::from_str::<OnlineTransaction>(&json))
            .transpose()
            .map_err(|e| corrupt("online_tx", e))?;
        Ok(Order {
            id: row.id,
            order_id: OrderId(row.order_id),
            customer_id: row.customer_id,
            total_amount: Amount::from(row.total_amount),
            delivery_method: row.delivery_method.parse().map_err(|e| corrupt("delivery_method", e))?,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            financial_state: row.financial_state.parse().map_err(|e| corrupt("financial_state", e))?,
            total_paid: Amount::from(row.total_paid),
            total_refunded: Amount::from(row.total_refunded),
            current_online_tx,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Inserts the order into the database, returning `false` in the second
/// element if the order already exists. New orders start in `draft` and get
/// their first status-history entry here.
pub async fn idempotent_insert(order: NewOrder, conn: &mut SqliteConnection) -> Result<(Order, bool), LedgerError> {
    match fetch_order_by_order_id(&order.order_id, conn).await? {
        Some(existing) => Ok((existing, false)),
        None => {
            let order = insert_order(order, conn).await?;
            status_history::append(order.id, order.status, None, conn).await?;
            debug!("📝️ Order [{}] inserted with id {}", order.order_id, order.id);
            Ok((order, true))
        },
    }
}

async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, LedgerError> {
    let row: OrderRow = sqlx::query_as(
        r#"
            INSERT INTO orders (order_id, customer_id, total_amount, delivery_method, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(order.order_id.as_str())
    .bind(order.customer_id)
    .bind(order.total_amount)
    .bind(order.delivery_method.to_string())
    .bind(order.created_at)
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, LedgerError> {
    let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE order_id = $1")
        .bind(order_id.as_str())
        .fetch_optional(conn)
        .await?;
    row.map(Order::try_from).transpose()
}

pub(crate) async fn update_financials(
    id: i64,
    summary: &FinancialSummary,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    sqlx::query(
        "UPDATE orders SET financial_state = $1, total_paid = $2, total_refunded = $3, updated_at = \
         CURRENT_TIMESTAMP WHERE id = $4",
    )
    .bind(summary.state.to_string())
    .bind(summary.total_paid)
    .bind(summary.total_refunded)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn update_status(id: i64, status: OrderStatus, conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    sqlx::query("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(status.to_string())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Writes the pending online transaction (JSON plus the denormalised scan
/// columns), or clears all three when `tx` is `None`.
pub(crate) async fn store_online_tx(
    id: i64,
    tx: Option<&OnlineTransaction>,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    match tx {
        Some(tx) => {
            let json = serde_json::to_string(tx)
                .map_err(|e| LedgerError::DatabaseError(format!("Could not serialize online transaction: {e}")))?;
            sqlx::query(
                "UPDATE orders SET online_tx = $1, online_tx_status = $2, online_tx_started_at = $3, updated_at = \
                 CURRENT_TIMESTAMP WHERE id = $4",
            )
            .bind(json)
            .bind(tx.status.to_string())
            .bind(tx.started_at.timestamp())
            .bind(id)
            .execute(conn)
            .await?;
        },
        None => {
            sqlx::query(
                "UPDATE orders SET online_tx = NULL, online_tx_status = NULL, online_tx_started_at = NULL, \
                 updated_at = CURRENT_TIMESTAMP WHERE id = $1",
            )
            .bind(id)
            .execute(conn)
            .await?;
        },
    }
    Ok(())
}

/// Orders whose online transaction is still `init` and started at or before
/// the cutoff. These are the candidates for reconciliation.
pub(crate) async fn fetch_stuck_orders(
    cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, LedgerError> {
    let rows: Vec<OrderRow> = sqlx::query_as(
        "SELECT * FROM orders WHERE online_tx_status = 'init' AND online_tx_started_at <= $1 ORDER BY \
         online_tx_started_at ASC",
    )
    .bind(cutoff.timestamp())
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(Order::try_from).collect()
}
