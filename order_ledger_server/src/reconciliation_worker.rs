use std::time::Duration;

use log::*;
use order_ledger_engine::{reconciliation::ReconciliationScheduler, SqliteDatabase};
use tokio::task::JoinHandle;

/// Starts the reconciliation worker. Do not await the returned JoinHandle,
/// as it will run indefinitely. The interval equals the transaction
/// expiration window, so an attempt is examined one window after it stalls.
pub fn start_reconciliation_worker(
    scheduler: ReconciliationScheduler<SqliteDatabase>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Reconciliation worker started (every {} s)", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running reconciliation job");
            match scheduler.tick().await {
                Ok(summary) => {
                    if summary.stuck_orders > 0 {
                        info!("🕰️ Reconciliation: {summary}");
                    }
                },
                Err(e) => {
                    // The tick is abandoned and retried from scratch next time.
                    error!("🕰️ Error running reconciliation job: {e}");
                },
            }
        }
    })
}
