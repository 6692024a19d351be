//! The order-status step machine.
//!
//! Each delivery method has an ordered list of steps. Orders only move one
//! step forward at a time, one step back where a step allows it, or sideways
//! into `cancelled` from any active status. The machine is pure: it validates
//! a requested transition against the order and its net paid amount, and the
//! storage layer records the result.
use ofl_common::Amount;
use thiserror::Error;

use crate::db_types::{DeliveryMethod, Order, OrderStatus};

/// One stage in a delivery method's fulfilment sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub status: OrderStatus,
    /// Whether an admin may undo this step, returning to the previous one.
    pub rollback_allowed: bool,
}

const fn step(status: OrderStatus, rollback_allowed: bool) -> Step {
    Step { status, rollback_allowed }
}

const TRANSPORT_COMPANY_STEPS: &[Step] = &[
    step(OrderStatus::Draft, false),
    step(OrderStatus::Confirmed, false),
    step(OrderStatus::Assembled, true),
    step(OrderStatus::Shipped, true),
    step(OrderStatus::Delivered, true),
    step(OrderStatus::Completed, false),
];

const SELF_PICKUP_STEPS: &[Step] = &[
    step(OrderStatus::Draft, false),
    step(OrderStatus::Confirmed, false),
    step(OrderStatus::Assembled, true),
    step(OrderStatus::Completed, false),
];

pub fn steps_for(method: DeliveryMethod) -> &'static [Step] {
    match method {
        DeliveryMethod::TransportCompany => TRANSPORT_COMPANY_STEPS,
        DeliveryMethod::SelfPickup => SELF_PICKUP_STEPS,
    }
}

/// A requested change to an order's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Move to the named status, which must be exactly the next step.
    Next(OrderStatus),
    /// Undo the current step, returning to the named (immediately preceding)
    /// status.
    Rollback(OrderStatus),
    /// Cancel the order. Legal from any active status.
    Cancel,
}

/// A validated transition, ready to be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Set on cancellation: the status the order held when it was cancelled.
    pub last_active_status: Option<OrderStatus>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatusError {
    #[error("Status {0} is terminal; the order cannot change status any further")]
    Terminal(OrderStatus),
    #[error("Cannot move from {current} to {requested}; the only legal next step is {expected}")]
    NotNextStep { current: OrderStatus, requested: OrderStatus, expected: OrderStatus },
    #[error("Status {current} is not part of the {method} fulfilment sequence")]
    UnknownStep { current: OrderStatus, method: DeliveryMethod },
    #[error("Step {0} does not allow rollback")]
    RollbackNotAllowed(OrderStatus),
    #[error("Rollback from {current} returns to {expected}, not {requested}")]
    RollbackTargetMismatch { current: OrderStatus, requested: OrderStatus, expected: OrderStatus },
    #[error("Order cannot be completed: net paid {net_paid} is less than the order total {total}")]
    CompletionRequiresFullPayment { net_paid: Amount, total: Amount },
    #[error("Order total {total} is below the minimum order amount of {minimum}")]
    BelowMinimumOrderAmount { total: Amount, minimum: Amount },
}

/// The step-machine validator, configured with the store's minimum order
/// amount.
#[derive(Debug, Clone, Copy)]
pub struct StatusMachine {
    min_order_amount: Amount,
}

impl StatusMachine {
    pub fn new(min_order_amount: Amount) -> Self {
        Self { min_order_amount }
    }

    /// Validates `action` against the order's current position in its
    /// delivery method's step sequence. Returns the transition to record, or
    /// the domain error to surface to the caller. Never mutates anything.
    pub fn evaluate(&self, order: &Order, net_paid: Amount, action: StatusAction) -> Result<StatusChange, StatusError> {
        let current = order.status;
        match action {
            StatusAction::Cancel => {
                if current.is_terminal() {
                    return Err(StatusError::Terminal(current));
                }
                Ok(StatusChange { from: current, to: OrderStatus::Cancelled, last_active_status: Some(current) })
            },
            StatusAction::Next(requested) => {
                self.check_minimum(order)?;
                if current.is_terminal() {
                    return Err(StatusError::Terminal(current));
                }
                let steps = steps_for(order.delivery_method);
                let position = self.position_of(current, order.delivery_method)?;
                let expected = steps[position + 1].status;
                if requested != expected {
                    return Err(StatusError::NotNextStep { current, requested, expected });
                }
                if expected == OrderStatus::Completed && !net_paid.covers(order.total_amount) {
                    return Err(StatusError::CompletionRequiresFullPayment { net_paid, total: order.total_amount });
                }
                Ok(StatusChange { from: current, to: expected, last_active_status: None })
            },
            StatusAction::Rollback(requested) => {
                self.check_minimum(order)?;
                if current.is_terminal() {
                    return Err(StatusError::Terminal(current));
                }
                let steps = steps_for(order.delivery_method);
                let position = self.position_of(current, order.delivery_method)?;
                if position == 0 || !steps[position].rollback_allowed {
                    return Err(StatusError::RollbackNotAllowed(current));
                }
                let expected = steps[position - 1].status;
                if requested != expected {
                    return Err(StatusError::RollbackTargetMismatch { current, requested, expected });
                }
                Ok(StatusChange { from: current, to: expected, last_active_status: None })
            },
        }
    }

    fn check_minimum(&self, order: &Order) -> Result<(), StatusError> {
        if !order.total_amount.covers(self.min_order_amount) {
            return Err(StatusError::BelowMinimumOrderAmount {
                total: order.total_amount,
                minimum: self.min_order_amount,
            });
        }
        Ok(())
    }

    fn position_of(&self, current: OrderStatus, method: DeliveryMethod) -> Result<usize, StatusError> {
        steps_for(method)
            .iter()
            .position(|s| s.status == current)
            .ok_or(StatusError::UnknownStep { current, method })
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::db_types::{FinancialState, OrderId};

    fn order(status: OrderStatus, method: DeliveryMethod, total: f64) -> Order {
        Order {
            id: 1,
            order_id: OrderId::from("SO-1001"),
            customer_id: "cust-1".to_string(),
            total_amount: Amount::from(total),
            delivery_method: method,
            status,
            financial_state: FinancialState::Unpaid,
            total_paid: Amount::ZERO,
            total_refunded: Amount::ZERO,
            current_online_tx: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn machine() -> StatusMachine {
        StatusMachine::new(Amount::from(100.0))
    }

    #[test]
    fn forward_one_step_at_a_time() {
        let o = order(OrderStatus::Confirmed, DeliveryMethod::TransportCompany, 1000.0);
        let change = machine().evaluate(&o, Amount::ZERO, StatusAction::Next(OrderStatus::Assembled)).unwrap();
        assert_eq!(change.to, OrderStatus::Assembled);
        assert_eq!(change.last_active_status, None);
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        // self-pickup goes confirmed -> assembled -> completed; jumping straight
        // to completed must fail
        let o = order(OrderStatus::Confirmed, DeliveryMethod::SelfPickup, 1000.0);
        let err = machine().evaluate(&o, Amount::from(1000.0), StatusAction::Next(OrderStatus::Completed)).unwrap_err();
        assert_eq!(
            err,
            StatusError::NotNextStep {
                current: OrderStatus::Confirmed,
                requested: OrderStatus::Completed,
                expected: OrderStatus::Assembled,
            }
        );
    }

    #[test]
    fn completion_requires_full_payment() {
        let o = order(OrderStatus::Assembled, DeliveryMethod::SelfPickup, 1000.0);
        let err = machine().evaluate(&o, Amount::from(999.0), StatusAction::Next(OrderStatus::Completed)).unwrap_err();
        assert!(matches!(err, StatusError::CompletionRequiresFullPayment { .. }));
        let ok = machine().evaluate(&o, Amount::from(1000.0), StatusAction::Next(OrderStatus::Completed));
        assert!(ok.is_ok());
    }

    #[test]
    fn cancel_records_last_active_status() {
        let o = order(OrderStatus::Shipped, DeliveryMethod::TransportCompany, 1000.0);
        let change = machine().evaluate(&o, Amount::ZERO, StatusAction::Cancel).unwrap();
        assert_eq!(change.to, OrderStatus::Cancelled);
        assert_eq!(change.last_active_status, Some(OrderStatus::Shipped));
    }

    #[test]
    fn terminal_statuses_are_frozen() {
        let done = order(OrderStatus::Completed, DeliveryMethod::SelfPickup, 1000.0);
        assert!(machine().evaluate(&done, Amount::ZERO, StatusAction::Cancel).is_err());
        let cancelled = order(OrderStatus::Cancelled, DeliveryMethod::SelfPickup, 1000.0);
        let err = machine().evaluate(&cancelled, Amount::ZERO, StatusAction::Next(OrderStatus::Confirmed)).unwrap_err();
        assert_eq!(err, StatusError::Terminal(OrderStatus::Cancelled));
    }

    #[test]
    fn rollback_only_where_allowed_and_only_one_step() {
        let shipped = order(OrderStatus::Shipped, DeliveryMethod::TransportCompany, 1000.0);
        let change = machine().evaluate(&shipped, Amount::ZERO, StatusAction::Rollback(OrderStatus::Assembled)).unwrap();
        assert_eq!(change.to, OrderStatus::Assembled);

        let err =
            machine().evaluate(&shipped, Amount::ZERO, StatusAction::Rollback(OrderStatus::Confirmed)).unwrap_err();
        assert!(matches!(err, StatusError::RollbackTargetMismatch { .. }));

        let confirmed = order(OrderStatus::Confirmed, DeliveryMethod::TransportCompany, 1000.0);
        let err = machine().evaluate(&confirmed, Amount::ZERO, StatusAction::Rollback(OrderStatus::Draft)).unwrap_err();
        assert_eq!(err, StatusError::RollbackNotAllowed(OrderStatus::Confirmed));
    }

    #[test]
    fn minimum_order_amount_gates_non_cancel_transitions() {
        let o = order(OrderStatus::Draft, DeliveryMethod::SelfPickup, 50.0);
        let err = machine().evaluate(&o, Amount::ZERO, StatusAction::Next(OrderStatus::Confirmed)).unwrap_err();
        assert!(matches!(err, StatusError::BelowMinimumOrderAmount { .. }));
        // cancellation is exempt
        assert!(machine().evaluate(&o, Amount::ZERO, StatusAction::Cancel).is_ok());
    }
}
