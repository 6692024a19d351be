use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{CriticalEvent, NewCriticalEvent, OrderId},
    traits::LedgerError,
};

#[derive(Debug, FromRow)]
struct CriticalRow {
    id: i64,
    order_id: Option<String>,
    reason: String,
    details: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<CriticalRow> for CriticalEvent {
    type Error = LedgerError;

    fn try_from(row: CriticalRow) -> Result<Self, Self::Error> {
        Ok(CriticalEvent {
            id: row.id,
            order_id: row.order_id.map(OrderId),
            reason: row
                .reason
                .parse()
                .map_err(|e| LedgerError::DatabaseError(format!("Corrupt critical event row: {e}")))?,
            details: serde_json::from_str(&row.details)
                .map_err(|e| LedgerError::DatabaseError(format!("Corrupt critical event details: {e}")))?,
            created_at: row.created_at,
        })
    }
}

pub(crate) async fn insert(event: NewCriticalEvent, conn: &mut SqliteConnection) -> Result<CriticalEvent, LedgerError> {
    let details = event.details.to_string();
    let row: CriticalRow =
        sqlx::query_as("INSERT INTO critical_events (order_id, reason, details) VALUES ($1, $2, $3) RETURNING *")
            .bind(event.order_id.as_ref().map(|o| o.as_str().to_string()))
            .bind(event.reason.to_string())
            .bind(details)
            .fetch_one(conn)
            .await?;
    row.try_into()
}

pub(crate) async fn events_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<CriticalEvent>, LedgerError> {
    let rows: Vec<CriticalRow> =
        sqlx::query_as("SELECT * FROM critical_events WHERE order_id = $1 ORDER BY id ASC")
            .bind(order_id.as_str())
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(CriticalEvent::try_from).collect()
}
