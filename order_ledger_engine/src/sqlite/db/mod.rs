//! # SQLite database methods
//!
//! Low-level SQLite interactions, kept as simple functions that accept a
//! `&mut SqliteConnection`. Callers obtain a connection from the pool, or
//! open an atomic transaction and pass `&mut *tx`, so the transaction
//! boundary is always decided at the call site and never inside this module.
use std::env;

use log::info;
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

pub mod critical_events;
pub mod customers;
pub mod ledger_events;
pub mod orders;
pub mod status_history;

const SQLITE_DB_URL: &str = "sqlite://data/ofl_store.db";

pub fn db_url() -> String {
    let result = env::var("OFL_DATABASE_URL").unwrap_or_else(|_| {
        info!("OFL_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    Ok(pool)
}
