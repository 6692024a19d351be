use ofl_common::{Amount, DEFAULT_CURRENCY_CODE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::helpers::format_money;

/// YooKassa expresses money as a decimal string plus a currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAmount {
    pub value: String,
    pub currency: String,
}

impl MoneyAmount {
    pub fn new(amount: Amount) -> Self {
        Self { value: format_money(amount), currency: DEFAULT_CURRENCY_CODE.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YookassaPayment {
    pub id: String,
    /// `pending`, `waiting_for_capture`, `succeeded` or `canceled`.
    pub status: String,
    #[serde(default)]
    pub paid: bool,
    pub amount: MoneyAmount,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confirmation: Option<Confirmation>,
    /// Free-form payload echoed back by the gateway; the order id travels
    /// here.
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YookassaRefund {
    pub id: String,
    pub payment_id: String,
    /// `pending`, `succeeded` or `canceled`.
    pub status: String,
    pub amount: MoneyAmount,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// The push payload YooKassa delivers to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotification {
    #[serde(rename = "type")]
    pub kind: String,
    /// e.g. `payment.succeeded`, `payment.canceled`, `refund.succeeded`.
    pub event: String,
    pub object: Value,
}

pub(crate) fn metadata_order_id(metadata: Option<&Value>) -> Option<String> {
    metadata.and_then(|m| m.get("order_id")).and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payment_deserializes_from_gateway_json() {
        let json = serde_json::json!({
            "id": "22e12f66-000f-5000-8000-18db351245c7",
            "status": "succeeded",
            "paid": true,
            "amount": { "value": "1000.00", "currency": "RUB" },
            "description": "Order SO-1001",
            "metadata": { "order_id": "SO-1001" },
            "created_at": "2024-06-12T10:51:18.139Z",
            "refundable": true,
            "test": false
        });
        let payment: YookassaPayment = serde_json::from_value(json).unwrap();
        assert_eq!(payment.id, "22e12f66-000f-5000-8000-18db351245c7");
        assert_eq!(payment.amount.value, "1000.00");
        assert_eq!(metadata_order_id(payment.metadata.as_ref()).as_deref(), Some("SO-1001"));
    }

    #[test]
    fn list_page_tolerates_missing_cursor() {
        let json = serde_json::json!({ "type": "list", "items": [] });
        let page: ListPage<Value> = serde_json::from_value(json).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
