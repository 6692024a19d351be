use std::fmt::Debug;

use log::*;
use ofl_common::Amount;

use crate::{
    db_types::{Actor, EventKind, NewFinancialEvent, NewOrder, Order, OrderId},
    events::{EventProducers, OrderUpdateMessage, OrderUpdatedEvent},
    helpers::Deadline,
    online::OnlineTransaction,
    status::{StatusAction, StatusChange, StatusMachine},
    traits::{
        ApplyOutcome,
        CreatePaymentRequest,
        LedgerDatabase,
        LedgerError,
        NormalizedTransaction,
        PaymentInit,
        ProviderAdapter,
        ProviderError,
        RefundBatchOutcome,
        RefundTask,
    },
};

/// `OrderFlowApi` is the primary API for mutating an order's financial
/// ledger and fulfilment status, on behalf of checkout actions, admin
/// actions, webhook deliveries and the reconciliation job.
///
/// Every mutation goes through the guarded applier in the storage backend,
/// and every committed mutation is fanned out to subscribers as a patch
/// message.
pub struct OrderFlowApi<B> {
    db: B,
    machine: StatusMachine,
    producers: EventProducers,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, machine: StatusMachine, producers: EventProducers) -> Self {
        Self { db, machine, producers }
    }
}

impl<B> OrderFlowApi<B>
where B: LedgerDatabase
{
    /// Submit a new order. Idempotent: if the order already exists, the
    /// existing record is returned untouched.
    pub async fn submit_order(&self, order: NewOrder) -> Result<(Order, bool), LedgerError> {
        let (order, inserted) = self.db.insert_order(order).await?;
        debug!("🔄️📦️ Order {} processing complete (inserted: {inserted})", order.order_id);
        Ok((order, inserted))
    }

    pub async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, LedgerError> {
        self.db.fetch_order(order_id).await?.ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))
    }

    /// Present a payment or refund to the ledger. See
    /// [`LedgerDatabase::apply_transaction`] for the contract; on top of it,
    /// this publishes a fanout patch for every mutation that changed the
    /// order.
    pub async fn apply_transaction(
        &self,
        event: NewFinancialEvent,
        mark_as_failed: bool,
        deadline: Deadline,
    ) -> Result<ApplyOutcome, LedgerError> {
        let outcome = self.db.apply_transaction(event, mark_as_failed, deadline).await?;
        match &outcome {
            ApplyOutcome::Applied { order, event } => {
                debug!("🔄️💰️ {} of {} applied to order {}", event.kind, event.amount, order.order_id);
                self.publish_update(OrderUpdateMessage::for_order(order, Some(event.clone()))).await;
            },
            ApplyOutcome::FailureCleared { order } => {
                info!("🔄️💰️ Failed gateway attempt cleaned up on order {}", order.order_id);
                self.publish_update(OrderUpdateMessage::for_order(order, None)).await;
            },
            ApplyOutcome::Duplicate { order } => {
                debug!("🔄️💰️ Duplicate transaction on order {} ignored", order.order_id);
            },
            ApplyOutcome::Pending { .. } => {},
        }
        Ok(outcome)
    }

    /// Void a ledger entry. The entry stays in the history for audit but is
    /// excluded from all aggregates from here on.
    pub async fn void_event(
        &self,
        order_id: &OrderId,
        event_id: i64,
        note: Option<String>,
        deadline: Deadline,
    ) -> Result<Order, LedgerError> {
        let (order, voided) = self.db.void_event(order_id, event_id, note, deadline).await?;
        self.publish_update(OrderUpdateMessage::for_order(&order, Some(voided))).await;
        Ok(order)
    }

    /// Advance, roll back or cancel the order's fulfilment status.
    pub async fn advance_status(
        &self,
        order_id: &OrderId,
        action: StatusAction,
        deadline: Deadline,
    ) -> Result<(Order, StatusChange), LedgerError> {
        let (order, change) = self.db.advance_order_status(order_id, action, &self.machine, deadline).await?;
        info!("🔄️📦️ Order {} status changed from {} to {}", order.order_id, change.from, change.to);
        self.publish_update(OrderUpdateMessage::for_order(&order, None)).await;
        Ok((order, change))
    }

    /// Start an online payment through the given gateway and track the
    /// round-trip on the order. Returns the confirmation URL for the
    /// storefront redirect.
    pub async fn begin_online_payment(
        &self,
        adapter: &dyn ProviderAdapter,
        request: CreatePaymentRequest,
        deadline: Deadline,
    ) -> Result<(Order, PaymentInit), LedgerError> {
        deadline.check()?;
        let order = self.fetch_order(&request.order_id).await?;
        let net_paid = order.net_paid();
        if (net_paid + request.amount).exceeds(order.total_amount) {
            return Err(LedgerError::PaymentExceedsOrderTotal {
                amount: request.amount,
                net_paid,
                total: order.total_amount,
            });
        }
        let init = adapter.create_payment(&request).await?;
        deadline.check()?;
        let pending = match order.current_online_tx.clone() {
            Some(existing) => existing.with_attempt(adapter.tag(), init.payment_id.clone(), init.confirmation_url.clone()),
            None => OnlineTransaction::begin(
                EventKind::Payment,
                adapter.tag(),
                init.payment_id.clone(),
                init.confirmation_url.clone(),
            ),
        };
        let order = self.db.update_online_transaction(&request.order_id, Some(pending)).await?;
        info!("🔄️💳️ Online payment [{}] started on order {} via {}", init.payment_id, order.order_id, adapter.tag());
        Ok((order, init))
    }

    /// Start online refunds through the given gateway. Each task succeeds or
    /// fails independently; the successful refund ids are tracked on the
    /// order's pending online transaction.
    pub async fn begin_online_refund(
        &self,
        adapter: &dyn ProviderAdapter,
        order_id: &OrderId,
        tasks: Vec<RefundTask>,
        deadline: Deadline,
    ) -> Result<(Order, RefundBatchOutcome), LedgerError> {
        deadline.check()?;
        let order = self.fetch_order(order_id).await?;
        let requested: Amount = tasks.iter().map(|t| t.amount).sum();
        let net_paid = order.net_paid();
        if requested.exceeds(net_paid) {
            return Err(LedgerError::RefundExceedsNetPaid { amount: requested, net_paid });
        }
        let outcome = adapter.create_refund(&tasks).await;
        deadline.check()?;
        if outcome.refund_ids.is_empty() {
            warn!("🔄️💳️ No refund could be created on order {order_id}: {} errors", outcome.errors.len());
            return Ok((order, outcome));
        }
        let mut pending = order
            .current_online_tx
            .clone()
            .unwrap_or_else(|| OnlineTransaction::begin(EventKind::Refund, adapter.tag(), outcome.refund_ids[0].clone(), None));
        for refund_id in &outcome.refund_ids {
            pending = pending.with_attempt(adapter.tag(), refund_id.clone(), None);
        }
        let order = self.db.update_online_transaction(order_id, Some(pending)).await?;
        info!(
            "🔄️💳️ {} refund(s) started on order {} via {} ({} failed)",
            outcome.refund_ids.len(),
            order.order_id,
            adapter.tag(),
            outcome.errors.len()
        );
        Ok((order, outcome))
    }

    /// Apply a canonical gateway event, as produced by a webhook or by
    /// reconciliation. Unfinished transactions only update the pending
    /// bookkeeping; finished ones go through the applier.
    pub async fn handle_gateway_event(
        &self,
        normalized: NormalizedTransaction,
        actor: Actor,
        deadline: Deadline,
    ) -> Result<ApplyOutcome, LedgerError> {
        let order_id = normalized
            .order_id
            .clone()
            .ok_or_else(|| LedgerError::Gateway(ProviderError::MissingField("orderId".to_string())))?;
        if !normalized.finished {
            deadline.check()?;
            let mut order = self.fetch_order(&order_id).await?;
            if let Some(mut pending) = order.current_online_tx.take() {
                pending.absorb_evidence(
                    normalized.provider,
                    &normalized.transaction_id,
                    normalized.confirmation_url.as_deref(),
                );
                let order = self.db.update_online_transaction(&order_id, Some(pending)).await?;
                Ok(ApplyOutcome::Pending { order })
            } else {
                // Nothing outstanding on the order; evidence for an attempt
                // that was already resolved or abandoned.
                trace!("🔄️💳️ Ignoring non-terminal gateway event for order {order_id} with nothing pending");
                Ok(ApplyOutcome::Pending { order })
            }
        } else {
            let event = normalized.to_new_event(order_id, actor);
            self.apply_transaction(event, normalized.mark_as_failed, deadline).await
        }
    }

    /// Drop the order's pending online transaction, treating the attempt as
    /// abandoned.
    pub async fn clear_online_transaction(&self, order_id: &OrderId) -> Result<Order, LedgerError> {
        let order = self.db.update_online_transaction(order_id, None).await?;
        self.publish_update(OrderUpdateMessage::for_order(&order, None)).await;
        Ok(order)
    }

    async fn publish_update(&self, message: OrderUpdateMessage) {
        for producer in &self.producers.order_update_producer {
            trace!("🔄️📬️ Notifying order update subscribers");
            producer.publish_event(OrderUpdatedEvent::new(message.clone())).await;
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
