use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db_types::{FinancialEvent, Order, OrderId};

/// A single field update, addressed by its path in the order document.
/// Dashboards apply these in place instead of reloading whole orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPatch {
    pub path: String,
    pub value: Value,
}

impl OrderPatch {
    pub fn new<T: Serialize>(path: &str, value: T) -> Self {
        Self { path: path.to_string(), value: serde_json::to_value(value).unwrap_or(Value::Null) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedOrderData {
    pub order_patches: Vec<OrderPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_financials_event_entry: Option<FinancialEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdateBody {
    pub order_id: OrderId,
    pub updated_order_data: UpdatedOrderData,
}

/// The fanout message handed to the live-dashboard collaborator: a minimal
/// patch set plus the freshly appended ledger entry, never a full order dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdateMessage {
    pub order_update: OrderUpdateBody,
}

impl OrderUpdateMessage {
    pub fn new(order_id: OrderId, patches: Vec<OrderPatch>, new_event: Option<FinancialEvent>) -> Self {
        Self {
            order_update: OrderUpdateBody {
                order_id,
                updated_order_data: UpdatedOrderData {
                    order_patches: patches,
                    new_financials_event_entry: new_event,
                },
            },
        }
    }

    /// The standard patch set after a ledger mutation: the derived financial
    /// fields, the current status, and the pending online transaction (or
    /// its absence).
    pub fn for_order(order: &Order, new_event: Option<FinancialEvent>) -> Self {
        let patches = vec![
            OrderPatch::new("currentStatus", order.status),
            OrderPatch::new("financials.state", order.financial_state),
            OrderPatch::new("financials.totalPaid", order.total_paid),
            OrderPatch::new("financials.totalRefunded", order.total_refunded),
            OrderPatch::new("financials.currentOnlineTransaction", order.current_online_tx.as_ref()),
        ];
        Self::new(order.order_id.clone(), patches, new_event)
    }
}

/// Published after any committed mutation to an order's ledger, status or
/// pending online transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdatedEvent {
    pub message: OrderUpdateMessage,
}

impl OrderUpdatedEvent {
    pub fn new(message: OrderUpdateMessage) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use ofl_common::Amount;

    use super::*;
    use crate::db_types::{DeliveryMethod, FinancialState, OrderStatus};

    #[test]
    fn fanout_message_wire_shape() {
        let order = Order {
            id: 1,
            order_id: OrderId::from("SO-1001"),
            customer_id: "cust-1".to_string(),
            total_amount: Amount::from(1000.0),
            delivery_method: DeliveryMethod::SelfPickup,
            status: OrderStatus::Confirmed,
            financial_state: FinancialState::Paid,
            total_paid: Amount::from(1000.0),
            total_refunded: Amount::ZERO,
            current_online_tx: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let message = OrderUpdateMessage::for_order(&order, None);
        let json = serde_json::to_value(&message).unwrap();
        let update = &json["orderUpdate"];
        assert_eq!(update["orderId"], "SO-1001");
        let patches = update["updatedOrderData"]["orderPatches"].as_array().unwrap();
        assert!(patches.iter().any(|p| p["path"] == "financials.state" && p["value"] == "paid"));
        assert!(patches.iter().any(|p| p["path"] == "financials.currentOnlineTransaction" && p["value"].is_null()));
        assert!(update["updatedOrderData"].get("newFinancialsEventEntry").is_none());
    }
}
