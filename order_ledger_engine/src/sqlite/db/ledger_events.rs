use chrono::{DateTime, Utc};
use ofl_common::Amount;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{Actor, FinancialEvent, NewFinancialEvent},
    traits::LedgerError,
};

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    kind: String,
    method: String,
    provider: Option<String>,
    amount: f64,
    transaction_id: Option<String>,
    original_payment_id: Option<String>,
    actor_name: String,
    actor_role: String,
    created_at: DateTime<Utc>,
    voided: bool,
    voided_at: Option<DateTime<Utc>>,
    voided_note: Option<String>,
}

fn corrupt(field: &str, detail: impl std::fmt::Display) -> LedgerError {
    LedgerError::DatabaseError(format!("Corrupt ledger event row ({field}): {detail}"))
}

impl TryFrom<EventRow> for FinancialEvent {
    type Error = LedgerError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(FinancialEvent {
            id: row.id,
            kind: row.kind.parse().map_err(|e| corrupt("kind", e))?,
            method: row.method.parse().map_err(|e| corrupt("method", e))?,
            provider: row.provider.map(|p| p.parse()).transpose().map_err(|e| corrupt("provider", e))?,
            amount: Amount::from(row.amount),
            transaction_id: row.transaction_id,
            original_payment_id: row.original_payment_id,
            actor: Actor {
                name: row.actor_name,
                role: row.actor_role.parse().map_err(|e| corrupt("actor_role", e))?,
            },
            created_at: row.created_at,
            voided: row.voided,
            voided_at: row.voided_at,
            voided_note: row.voided_note,
        })
    }
}

pub(crate) async fn insert(
    order_ref: i64,
    event: &NewFinancialEvent,
    conn: &mut SqliteConnection,
) -> Result<FinancialEvent, LedgerError> {
    let row: EventRow = sqlx::query_as(
        r#"
            INSERT INTO ledger_events (
                order_ref,
                kind,
                method,
                provider,
                amount,
                transaction_id,
                original_payment_id,
                actor_name,
                actor_role
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(order_ref)
    .bind(event.kind.to_string())
    .bind(event.method.to_string())
    .bind(event.provider.map(|p| p.to_string()))
    .bind(event.amount)
    .bind(event.transaction_id.as_deref())
    .bind(event.original_payment_id.as_deref())
    .bind(event.actor.name.as_str())
    .bind(event.actor.role.to_string())
    .fetch_one(conn)
    .await?;
    row.try_into()
}

/// The order's full ledger, in append order, voided entries included.
pub(crate) async fn events_for_order(
    order_ref: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<FinancialEvent>, LedgerError> {
    let rows: Vec<EventRow> = sqlx::query_as("SELECT * FROM ledger_events WHERE order_ref = $1 ORDER BY id ASC")
        .bind(order_ref)
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(FinancialEvent::try_from).collect()
}

pub(crate) async fn fetch_event(
    order_ref: i64,
    event_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<FinancialEvent>, LedgerError> {
    let row: Option<EventRow> = sqlx::query_as("SELECT * FROM ledger_events WHERE order_ref = $1 AND id = $2")
        .bind(order_ref)
        .bind(event_id)
        .fetch_optional(conn)
        .await?;
    row.map(FinancialEvent::try_from).transpose()
}

/// The non-voided event carrying this transaction id, if the id has been
/// presented before. This is the idempotency lookup.
pub(crate) async fn find_active_by_transaction_id(
    order_ref: i64,
    transaction_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<FinancialEvent>, LedgerError> {
    let row: Option<EventRow> =
        sqlx::query_as("SELECT * FROM ledger_events WHERE order_ref = $1 AND transaction_id = $2 AND voided = 0")
            .bind(order_ref)
            .bind(transaction_id)
            .fetch_optional(conn)
            .await?;
    row.map(FinancialEvent::try_from).transpose()
}

pub(crate) async fn mark_voided(
    event_id: i64,
    note: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<FinancialEvent, LedgerError> {
    let row: Option<EventRow> = sqlx::query_as(
        "UPDATE ledger_events SET voided = 1, voided_at = CURRENT_TIMESTAMP, voided_note = $1 WHERE id = $2 \
         RETURNING *",
    )
    .bind(note)
    .bind(event_id)
    .fetch_optional(conn)
    .await?;
    row.map(FinancialEvent::try_from).transpose()?.ok_or(LedgerError::EventNotFound(event_id))
}
