use std::fmt::Display;

use chrono::{DateTime, Utc};
use ofl_common::Amount;

use crate::db_types::{FinancialEvent, Order, OrderId};

/// What happened when a transaction was presented to the ledger.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// A new event was appended and the aggregates recomputed.
    Applied { order: Order, event: FinancialEvent },
    /// The transaction id was already recorded. Nothing was appended; this
    /// is a success, not an error.
    Duplicate { order: Order },
    /// The gateway reported failure. No ledger entry; only the pending
    /// online-transaction bookkeeping was cleaned up.
    FailureCleared { order: Order },
    /// Gateway-side evidence was noted, but the transaction has not reached
    /// a terminal state yet.
    Pending { order: Order },
}

impl ApplyOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ApplyOutcome::Applied { order, .. }
            | ApplyOutcome::Duplicate { order }
            | ApplyOutcome::FailureCleared { order }
            | ApplyOutcome::Pending { order } => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            ApplyOutcome::Applied { order, .. }
            | ApplyOutcome::Duplicate { order }
            | ApplyOutcome::FailureCleared { order }
            | ApplyOutcome::Pending { order } => order,
        }
    }

    pub fn event(&self) -> Option<&FinancialEvent> {
        match self {
            ApplyOutcome::Applied { event, .. } => Some(event),
            _ => None,
        }
    }

    pub fn net_paid(&self) -> Amount {
        self.order().net_paid()
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// The slice of a stuck order a provider adapter needs to search its side
/// for matching transactions.
#[derive(Debug, Clone)]
pub struct StuckOrderRef {
    pub order_id: OrderId,
    pub transaction_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl StuckOrderRef {
    /// `None` if the order has no pending online transaction.
    pub fn from_order(order: &Order) -> Option<Self> {
        order.current_online_tx.as_ref().map(|tx| Self {
            order_id: order.order_id.clone(),
            transaction_ids: tx.transaction_ids.clone(),
            started_at: tx.started_at,
        })
    }
}

/// What one reconciliation pass did, for the end-of-tick summary log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub stuck_orders: usize,
    pub matched_transactions: usize,
    pub applied: usize,
    pub cleared: usize,
    pub flagged: usize,
    pub failures: usize,
}

impl Display for TickSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} stuck orders, {} matched transactions, {} ledger entries applied, {} cleared as abandoned, {} \
             flagged for review, {} failures",
            self.stuck_orders, self.matched_transactions, self.applied, self.cleared, self.flagged, self.failures
        )
    }
}
