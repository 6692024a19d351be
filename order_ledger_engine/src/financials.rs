//! The pure reducer from an order's event history to its financial state.
//!
//! Everything here is side-effect free. The stored `financial_state`,
//! `total_paid` and `total_refunded` columns are caches of this function's
//! output and can be rebuilt from the full history at any time.
use ofl_common::Amount;

use crate::db_types::{EventKind, FinancialEvent, FinancialState, OrderStatus};

/// The derived aggregates for one order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinancialSummary {
    pub total_paid: Amount,
    pub total_refunded: Amount,
    pub state: FinancialState,
}

impl FinancialSummary {
    pub fn net_paid(&self) -> Amount {
        self.total_paid - self.total_refunded
    }
}

/// Folds the event history into `{total_paid, total_refunded, state}`.
///
/// Voided events are skipped. Cancelled orders progress refund-pending →
/// refunded as the net paid amount returns to zero; active orders progress
/// unpaid → partially-paid → paid → overpaid against the order total. All
/// comparisons are epsilon-tolerant at the cent level.
pub fn compute_financials(events: &[FinancialEvent], status: OrderStatus, total_amount: Amount) -> FinancialSummary {
    let (total_paid, total_refunded) = events.iter().filter(|e| !e.voided).fold(
        (Amount::ZERO, Amount::ZERO),
        |(paid, refunded), e| match e.kind {
            EventKind::Payment => (paid + e.amount, refunded),
            EventKind::Refund => (paid, refunded + e.amount),
        },
    );
    let net_paid = total_paid - total_refunded;
    let state = if status == OrderStatus::Cancelled {
        if net_paid.is_approx_zero() {
            FinancialState::Refunded
        } else {
            FinancialState::RefundPending
        }
    } else if net_paid.exceeds(total_amount) {
        FinancialState::Overpaid
    } else if net_paid.covers(total_amount) {
        FinancialState::Paid
    } else if net_paid.exceeds(Amount::ZERO) {
        FinancialState::PartiallyPaid
    } else {
        FinancialState::Unpaid
    };
    FinancialSummary { total_paid, total_refunded, state }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::db_types::{Actor, ActorRole, PaymentMethod};

    fn event(id: i64, kind: EventKind, amount: f64) -> FinancialEvent {
        FinancialEvent {
            id,
            kind,
            method: PaymentMethod::CardOnline,
            provider: None,
            amount: Amount::from(amount),
            transaction_id: Some(format!("tx{id}")),
            original_payment_id: None,
            actor: Actor::new("test", ActorRole::Manager),
            created_at: Utc::now(),
            voided: false,
            voided_at: None,
            voided_note: None,
        }
    }

    #[test]
    fn empty_history_is_unpaid() {
        let summary = compute_financials(&[], OrderStatus::Confirmed, Amount::from(1000.0));
        assert_eq!(summary.state, FinancialState::Unpaid);
        assert!(summary.net_paid().is_approx_zero());
    }

    #[test]
    fn reducer_is_deterministic() {
        let events = vec![event(1, EventKind::Payment, 600.0), event(2, EventKind::Refund, 100.0)];
        let a = compute_financials(&events, OrderStatus::Confirmed, Amount::from(1000.0));
        let b = compute_financials(&events, OrderStatus::Confirmed, Amount::from(1000.0));
        assert_eq!(a, b);
        assert_eq!(a.state, FinancialState::PartiallyPaid);
        assert_eq!(a.net_paid(), Amount::from(500.0));
    }

    #[test]
    fn ordering_of_same_type_events_does_not_matter() {
        let forward = vec![event(1, EventKind::Payment, 300.0), event(2, EventKind::Payment, 700.0)];
        let reverse = vec![event(2, EventKind::Payment, 700.0), event(1, EventKind::Payment, 300.0)];
        let total = Amount::from(1000.0);
        assert_eq!(
            compute_financials(&forward, OrderStatus::Confirmed, total),
            compute_financials(&reverse, OrderStatus::Confirmed, total)
        );
    }

    #[test]
    fn state_progression_against_total() {
        let total = Amount::from(1000.0);
        let paid = vec![event(1, EventKind::Payment, 1000.0)];
        assert_eq!(compute_financials(&paid, OrderStatus::Confirmed, total).state, FinancialState::Paid);
        let over = vec![event(1, EventKind::Payment, 1200.0)];
        assert_eq!(compute_financials(&over, OrderStatus::Confirmed, total).state, FinancialState::Overpaid);
        // a payment within epsilon of the total still counts as paid
        let close = vec![event(1, EventKind::Payment, 999.995)];
        assert_eq!(compute_financials(&close, OrderStatus::Confirmed, total).state, FinancialState::Paid);
    }

    #[test]
    fn voided_events_are_excluded_from_aggregates() {
        let mut events = vec![event(1, EventKind::Payment, 1000.0), event(2, EventKind::Payment, 500.0)];
        events[1].voided = true;
        let summary = compute_financials(&events, OrderStatus::Confirmed, Amount::from(1000.0));
        assert_eq!(summary.total_paid, Amount::from(1000.0));
        assert_eq!(summary.state, FinancialState::Paid);
    }

    #[test]
    fn cancelled_orders_track_refund_progress() {
        let total = Amount::from(1000.0);
        let unreturned = vec![event(1, EventKind::Payment, 1000.0)];
        assert_eq!(compute_financials(&unreturned, OrderStatus::Cancelled, total).state, FinancialState::RefundPending);
        let returned = vec![event(1, EventKind::Payment, 1000.0), event(2, EventKind::Refund, 1000.0)];
        assert_eq!(compute_financials(&returned, OrderStatus::Cancelled, total).state, FinancialState::Refunded);
    }
}
