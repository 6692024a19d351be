use ofl_common::Amount;
use sqlx::SqliteConnection;

use crate::traits::LedgerError;

/// Adds `delta` (which may be negative) to the customer's running
/// total-spent aggregate, creating the row on first contact.
pub(crate) async fn adjust_total_spent(
    customer_id: &str,
    delta: Amount,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
            INSERT INTO customers (customer_id, total_spent) VALUES ($1, $2)
            ON CONFLICT (customer_id) DO UPDATE
            SET total_spent = total_spent + excluded.total_spent, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(customer_id)
    .bind(delta)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn total_spent(customer_id: &str, conn: &mut SqliteConnection) -> Result<Amount, LedgerError> {
    let value: Option<f64> = sqlx::query_scalar("SELECT total_spent FROM customers WHERE customer_id = $1")
        .bind(customer_id)
        .fetch_optional(conn)
        .await?;
    Ok(Amount::from(value.unwrap_or(0.0)))
}
