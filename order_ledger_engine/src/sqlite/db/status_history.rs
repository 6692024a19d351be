use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{OrderStatus, StatusHistoryEntry},
    traits::LedgerError,
};

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: i64,
    status: String,
    last_active_status: Option<String>,
    changed_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for StatusHistoryEntry {
    type Error = LedgerError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let parse = |s: &str| {
            s.parse::<OrderStatus>()
                .map_err(|e| LedgerError::DatabaseError(format!("Corrupt status history row: {e}")))
        };
        Ok(StatusHistoryEntry {
            id: row.id,
            status: parse(&row.status)?,
            changed_at: row.changed_at,
            last_active_status: row.last_active_status.as_deref().map(parse).transpose()?,
        })
    }
}

pub(crate) async fn append(
    order_ref: i64,
    status: OrderStatus,
    last_active_status: Option<OrderStatus>,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    sqlx::query("INSERT INTO order_status_history (order_ref, status, last_active_status) VALUES ($1, $2, $3)")
        .bind(order_ref)
        .bind(status.to_string())
        .bind(last_active_status.map(|s| s.to_string()))
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn history_for_order(
    order_ref: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<StatusHistoryEntry>, LedgerError> {
    let rows: Vec<HistoryRow> =
        sqlx::query_as("SELECT * FROM order_status_history WHERE order_ref = $1 ORDER BY id ASC")
            .bind(order_ref)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(StatusHistoryEntry::try_from).collect()
}
