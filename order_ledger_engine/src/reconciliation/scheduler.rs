use std::{
    collections::HashMap,
    fmt::Debug,
    sync::Arc,
};

use chrono::Duration;
use log::*;
use serde_json::json;

use crate::{
    db_types::{Actor, CriticalReason, NewCriticalEvent, Order, OrderId, OrderStatus, ProviderTag},
    helpers::Deadline,
    reconciliation::Clock,
    traits::{LedgerDatabase, LedgerError, NormalizedTransaction, ProviderRegistry, StuckOrderRef, TickSummary},
    OrderFlowApi,
};

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationConfig {
    /// How long an `init` online transaction may sit without gateway
    /// evidence before it is considered stuck. The scheduler runs on this
    /// same interval.
    pub expiration_window: Duration,
    /// Safety margin subtracted from the earliest `started_at` when asking
    /// providers for their recent transactions.
    pub lookback_margin: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self { expiration_window: Duration::minutes(30), lookback_margin: Duration::minutes(5) }
    }
}

/// Resolves stuck online transactions by polling the providers, normalizing
/// whatever they report, and driving the results through the same
/// transaction applier the live request path uses. Duplicate delivery
/// (webhook racing a reconciliation pass) is harmless because re-applying a
/// known transaction id is a no-op.
///
/// The scheduler is an explicit object with injected dependencies (store via
/// the api, provider adapters, clock), owned and started by the process
/// lifecycle rather than hiding behind module-level state.
pub struct ReconciliationScheduler<B> {
    api: OrderFlowApi<B>,
    providers: ProviderRegistry,
    clock: Arc<dyn Clock>,
    config: ReconciliationConfig,
}

impl<B> Debug for ReconciliationScheduler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationScheduler (window {} min)", self.config.expiration_window.num_minutes())
    }
}

enum StuckResolution {
    Cleared,
    Resolved { applied: usize },
    Flagged,
}

impl<B> ReconciliationScheduler<B>
where B: LedgerDatabase
{
    pub fn new(api: OrderFlowApi<B>, providers: ProviderRegistry, clock: Arc<dyn Clock>, config: ReconciliationConfig) -> Self {
        Self { api, providers, clock, config }
    }

    /// One reconciliation pass. A failure before any order is processed (the
    /// stuck-order query itself) aborts the tick and is retried from scratch
    /// on the next one; a failure on a single order is logged and skipped.
    pub async fn tick(&self) -> Result<TickSummary, LedgerError> {
        let now = self.clock.now();
        let cutoff = now - self.config.expiration_window;
        let stuck = self.api.db().fetch_stuck_orders(cutoff).await?;
        let mut summary = TickSummary { stuck_orders: stuck.len(), ..TickSummary::default() };
        if stuck.is_empty() {
            debug!("⏰️ Reconciliation tick: no stuck orders");
            return Ok(summary);
        }
        info!("⏰️ Reconciliation tick: {} stuck order(s) found", stuck.len());
        let matches = self.collect_matches(&stuck).await;
        summary.matched_transactions = matches.values().map(Vec::len).sum();
        for order in &stuck {
            match self.process_stuck_order(order, matches.get(&order.order_id).map(Vec::as_slice).unwrap_or(&[])).await
            {
                Ok(StuckResolution::Cleared) => summary.cleared += 1,
                Ok(StuckResolution::Resolved { applied }) => summary.applied += applied,
                Ok(StuckResolution::Flagged) => summary.flagged += 1,
                Err(e) => {
                    // One bad order must not abort the rest of the batch.
                    error!("⏰️ Error reconciling order {}: {e}", order.order_id);
                    summary.failures += 1;
                },
            }
        }
        info!("⏰️ Reconciliation tick complete: {summary}");
        Ok(summary)
    }

    /// Queries every provider listed by a stuck order and builds the
    /// order-id to normalized-transactions map. Provider failures are
    /// isolated: a dead gateway only removes its own candidates.
    async fn collect_matches(&self, stuck: &[Order]) -> HashMap<OrderId, Vec<NormalizedTransaction>> {
        let mut by_provider: HashMap<ProviderTag, Vec<StuckOrderRef>> = HashMap::new();
        for order in stuck {
            let Some(pending) = order.current_online_tx.as_ref() else { continue };
            let Some(order_ref) = StuckOrderRef::from_order(order) else { continue };
            for provider in &pending.providers {
                by_provider.entry(*provider).or_default().push(order_ref.clone());
            }
        }
        let mut matches: HashMap<OrderId, Vec<NormalizedTransaction>> = HashMap::new();
        for (tag, refs) in by_provider {
            let Some(adapter) = self.providers.get(tag) else {
                warn!("⏰️ {} stuck order(s) reference provider {tag}, but no adapter is registered", refs.len());
                continue;
            };
            let earliest = refs.iter().map(|r| r.started_at).min().unwrap_or_else(|| self.clock.now());
            let since = earliest - self.config.lookback_margin;
            let raw = match adapter.fetch_external(&refs, since).await {
                Ok(raw) => raw,
                Err(e) => {
                    error!("⏰️ Could not list transactions from {tag}: {e}");
                    continue;
                },
            };
            trace!("⏰️ {tag} returned {} raw transaction(s)", raw.len());
            for record in &raw {
                match adapter.normalize_external(record) {
                    Ok(normalized) => {
                        let Some(order_id) = normalized.order_id.clone() else {
                            trace!("⏰️ Skipping {tag} transaction [{}] with no order reference", normalized.transaction_id);
                            continue;
                        };
                        matches.entry(order_id).or_default().push(normalized);
                    },
                    Err(e) => {
                        // A record we cannot make sense of must not vanish
                        // silently; park it for a human.
                        warn!("⏰️ Unusable transaction record from {tag}: {e}");
                        let critical = NewCriticalEvent::new(
                            None,
                            CriticalReason::MalformedExternalTransaction,
                            json!({ "provider": tag, "error": e.to_string(), "record": record }),
                        );
                        if let Err(log_err) = self.api.db().record_critical_event(critical).await {
                            error!("⏰️ Could not record critical event: {log_err}");
                        }
                    },
                }
            }
        }
        matches
    }

    async fn process_stuck_order(
        &self,
        order: &Order,
        matches: &[NormalizedTransaction],
    ) -> Result<StuckResolution, LedgerError> {
        let pending = order.current_online_tx.as_ref().ok_or_else(|| {
            LedgerError::NoOnlineTransaction(order.order_id.clone())
        })?;
        if matches.is_empty() {
            // No gateway-side trace of the attempt: the customer walked away
            // before the gateway created anything. Expected, not an anomaly.
            info!(
                "⏰️ No external transactions found for order {}; clearing the abandoned attempt",
                order.order_id
            );
            self.api.clear_online_transaction(&order.order_id).await?;
            return Ok(StuckResolution::Cleared);
        }
        if order.status == OrderStatus::Draft {
            // A draft order cannot have started a gateway round-trip; the
            // data is corrupt. Flag it and apply nothing.
            let critical = NewCriticalEvent::new(
                Some(order.order_id.clone()),
                CriticalReason::StuckTransactionOnDraftOrder,
                json!({
                    "status": order.status,
                    "transactionIds": pending.transaction_ids,
                    "matched": matches.len(),
                }),
            );
            self.api.db().record_critical_event(critical).await?;
            self.api.db().update_online_transaction(&order.order_id, None).await?;
            return Ok(StuckResolution::Flagged);
        }

        // Evidence found: move the record to processing and fold in whatever
        // the gateway reported before applying the finished ones.
        let mut updated = pending.clone();
        for m in matches {
            updated.absorb_evidence(m.provider, &m.transaction_id, m.confirmation_url.as_deref());
        }
        self.api.db().update_online_transaction(&order.order_id, Some(updated)).await?;

        let mut applied = 0;
        for m in matches.iter().filter(|m| m.finished) {
            let event = m.to_new_event(order.order_id.clone(), Actor::system("reconciliation"));
            let outcome = self.api.apply_transaction(event, m.mark_as_failed, Deadline::unbounded()).await?;
            if outcome.is_applied() {
                applied += 1;
            }
        }
        debug!(
            "⏰️ Order {}: {} matched transaction(s), {} ledger entr{} applied",
            order.order_id,
            matches.len(),
            applied,
            if applied == 1 { "y" } else { "ies" }
        );
        Ok(StuckResolution::Resolved { applied })
    }

    pub fn api(&self) -> &OrderFlowApi<B> {
        &self.api
    }
}
