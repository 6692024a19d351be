use std::{collections::HashSet, net::IpAddr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;
use order_ledger_engine::{
    db_types::{EventKind, OrderId, ProviderTag},
    traits::{
        CreatePaymentRequest,
        NormalizedTransaction,
        PaymentInit,
        ProviderAdapter,
        ProviderError,
        RefundBatchOutcome,
        RefundTask,
        StuckOrderRef,
    },
};
use serde_json::Value;

use crate::{
    data_objects::{metadata_order_id, WebhookNotification, YookassaPayment, YookassaRefund},
    helpers::parse_money,
    YookassaApi,
    YookassaApiError,
    YookassaConfig,
};

/// The engine-facing face of the YooKassa integration.
pub struct YookassaAdapter {
    api: YookassaApi,
    webhook_allowlist: Option<Vec<IpAddr>>,
}

impl YookassaAdapter {
    pub fn new(config: YookassaConfig) -> Result<Self, YookassaApiError> {
        let webhook_allowlist = config.webhook_allowlist.clone();
        let api = YookassaApi::new(config)?;
        Ok(Self { api, webhook_allowlist })
    }

    pub fn api(&self) -> &YookassaApi {
        &self.api
    }

    fn normalize_payment(&self, payment: &YookassaPayment) -> Result<NormalizedTransaction, YookassaApiError> {
        let (finished, mark_as_failed) = match payment.status.as_str() {
            "succeeded" => (true, false),
            "canceled" => (true, true),
            "pending" | "waiting_for_capture" => (false, false),
            other => {
                trace!("Unrecognized payment status '{other}' on [{}]; treating as in-flight", payment.id);
                (false, false)
            },
        };
        Ok(NormalizedTransaction {
            provider: ProviderTag::Yookassa,
            kind: EventKind::Payment,
            transaction_id: payment.id.clone(),
            original_payment_id: None,
            amount: parse_money(&payment.amount.value)?,
            finished,
            mark_as_failed,
            confirmation_url: payment.confirmation.as_ref().and_then(|c| c.confirmation_url.clone()),
            order_id: metadata_order_id(payment.metadata.as_ref()).map(OrderId::from),
        })
    }

    fn normalize_refund(&self, refund: &YookassaRefund) -> Result<NormalizedTransaction, YookassaApiError> {
        let (finished, mark_as_failed) = match refund.status.as_str() {
            "succeeded" => (true, false),
            "canceled" => (true, true),
            _ => (false, false),
        };
        Ok(NormalizedTransaction {
            provider: ProviderTag::Yookassa,
            kind: EventKind::Refund,
            transaction_id: refund.id.clone(),
            original_payment_id: Some(refund.payment_id.clone()),
            amount: parse_money(&refund.amount.value)?,
            finished,
            mark_as_failed,
            confirmation_url: None,
            order_id: metadata_order_id(refund.metadata.as_ref()).map(OrderId::from),
        })
    }

    /// A raw listing record is a refund iff it references a parent payment.
    fn normalize_raw(&self, raw: &Value) -> Result<NormalizedTransaction, YookassaApiError> {
        if raw.get("payment_id").is_some() {
            let refund: YookassaRefund =
                serde_json::from_value(raw.clone()).map_err(|e| YookassaApiError::MissingField(e.to_string()))?;
            self.normalize_refund(&refund)
        } else {
            let payment: YookassaPayment =
                serde_json::from_value(raw.clone()).map_err(|e| YookassaApiError::MissingField(e.to_string()))?;
            self.normalize_payment(&payment)
        }
    }
}

#[async_trait]
impl ProviderAdapter for YookassaAdapter {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Yookassa
    }

    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<PaymentInit, ProviderError> {
        let payment = self
            .api
            .create_payment(request.amount, &request.description, request.order_id.as_str(), request.return_url.as_deref())
            .await
            .map_err(ProviderError::from)?;
        Ok(PaymentInit {
            payment_id: payment.id,
            confirmation_url: payment.confirmation.and_then(|c| c.confirmation_url),
        })
    }

    async fn create_refund(&self, tasks: &[RefundTask]) -> RefundBatchOutcome {
        let mut outcome = RefundBatchOutcome::default();
        for task in tasks {
            match self.api.create_refund(&task.payment_id, task.amount, task.order_id.as_str()).await {
                Ok(refund) => outcome.refund_ids.push(refund.id),
                Err(e) => {
                    warn!("Refund against payment [{}] failed: {e}", task.payment_id);
                    outcome.errors.push(e.into());
                },
            }
        }
        outcome
    }

    fn verify_webhook_authenticity(&self, remote_ip: IpAddr) -> bool {
        match &self.webhook_allowlist {
            Some(allowlist) => allowlist.contains(&remote_ip),
            None => true,
        }
    }

    fn normalize_webhook(&self, payload: &Value) -> Option<NormalizedTransaction> {
        let notification: WebhookNotification = match serde_json::from_value(payload.clone()) {
            Ok(n) => n,
            Err(e) => {
                warn!("Unparseable YooKassa webhook payload: {e}");
                return None;
            },
        };
        let result = match notification.event.as_str() {
            "payment.succeeded" | "payment.canceled" | "payment.waiting_for_capture" => {
                serde_json::from_value::<YookassaPayment>(notification.object)
                    .map_err(|e| YookassaApiError::MissingField(e.to_string()))
                    .and_then(|p| self.normalize_payment(&p))
            },
            "refund.succeeded" => serde_json::from_value::<YookassaRefund>(notification.object)
                .map_err(|e| YookassaApiError::MissingField(e.to_string()))
                .and_then(|r| self.normalize_refund(&r)),
            other => {
                debug!("Ignoring YooKassa webhook event '{other}'");
                return None;
            },
        };
        match result {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                warn!("Could not normalize YooKassa webhook object: {e}");
                None
            },
        }
    }

    async fn fetch_external(&self, stuck: &[StuckOrderRef], since: DateTime<Utc>) -> Result<Vec<Value>, ProviderError> {
        let mut records = self.api.list_payments_since(since).await.map_err(ProviderError::from)?;
        records.extend(self.api.list_refunds_since(since).await.map_err(ProviderError::from)?);
        // Only keep records that plausibly belong to the stuck batch: either
        // the order id in the metadata, or a transaction id we are waiting on.
        let order_ids: HashSet<&str> = stuck.iter().map(|s| s.order_id.as_str()).collect();
        let transaction_ids: HashSet<&str> =
            stuck.iter().flat_map(|s| s.transaction_ids.iter().map(String::as_str)).collect();
        let total = records.len();
        records.retain(|record| {
            let by_order = record
                .get("metadata")
                .and_then(|m| m.get("order_id"))
                .and_then(Value::as_str)
                .map(|id| order_ids.contains(id))
                .unwrap_or(false);
            let by_txid =
                record.get("id").and_then(Value::as_str).map(|id| transaction_ids.contains(id)).unwrap_or(false);
            by_order || by_txid
        });
        debug!("YooKassa listing: {} of {total} record(s) relate to the stuck batch", records.len());
        Ok(records)
    }

    fn normalize_external(&self, raw: &Value) -> Result<NormalizedTransaction, ProviderError> {
        self.normalize_raw(raw).map_err(ProviderError::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn adapter() -> YookassaAdapter {
        let config = YookassaConfig {
            shop_id: "123456".to_string(),
            secret_key: ofl_common::Secret::new("test_key".to_string()),
            api_base: "https://api.yookassa.ru/v3".to_string(),
            webhook_allowlist: Some(vec!["185.71.76.1".parse().unwrap()]),
        };
        YookassaAdapter::new(config).unwrap()
    }

    fn payment_json(status: &str) -> Value {
        serde_json::json!({
            "id": "pay-1",
            "status": status,
            "paid": status == "succeeded",
            "amount": { "value": "1000.00", "currency": "RUB" },
            "confirmation": { "type": "redirect", "confirmation_url": "https://yookassa.ru/checkout/pay-1" },
            "metadata": { "order_id": "SO-1001" }
        })
    }

    #[test]
    fn webhook_source_verification_uses_the_allowlist() {
        let adapter = adapter();
        assert!(adapter.verify_webhook_authenticity("185.71.76.1".parse().unwrap()));
        assert!(!adapter.verify_webhook_authenticity("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn succeeded_payment_webhook_normalizes_to_a_finished_payment() {
        let payload = serde_json::json!({
            "type": "notification",
            "event": "payment.succeeded",
            "object": payment_json("succeeded"),
        });
        let normalized = adapter().normalize_webhook(&payload).unwrap();
        assert_eq!(normalized.provider, ProviderTag::Yookassa);
        assert_eq!(normalized.kind, EventKind::Payment);
        assert_eq!(normalized.transaction_id, "pay-1");
        assert!(normalized.finished);
        assert!(!normalized.mark_as_failed);
        assert_eq!(normalized.order_id, Some(OrderId::from("SO-1001")));
    }

    #[test]
    fn canceled_payment_webhook_is_finished_and_failed() {
        let payload = serde_json::json!({
            "type": "notification",
            "event": "payment.canceled",
            "object": payment_json("canceled"),
        });
        let normalized = adapter().normalize_webhook(&payload).unwrap();
        assert!(normalized.finished);
        assert!(normalized.mark_as_failed);
    }

    #[test]
    fn waiting_for_capture_is_not_finished() {
        let payload = serde_json::json!({
            "type": "notification",
            "event": "payment.waiting_for_capture",
            "object": payment_json("waiting_for_capture"),
        });
        let normalized = adapter().normalize_webhook(&payload).unwrap();
        assert!(!normalized.finished);
    }

    #[test]
    fn unknown_events_and_garbage_are_dropped() {
        let adapter = adapter();
        let unknown = serde_json::json!({ "type": "notification", "event": "deal.closed", "object": {} });
        assert!(adapter.normalize_webhook(&unknown).is_none());
        assert!(adapter.normalize_webhook(&serde_json::json!({ "hello": "world" })).is_none());
    }

    #[test]
    fn refund_records_normalize_with_the_parent_payment() {
        let raw = serde_json::json!({
            "id": "ref-1",
            "payment_id": "pay-1",
            "status": "succeeded",
            "amount": { "value": "250.00", "currency": "RUB" },
            "metadata": { "order_id": "SO-1001" }
        });
        let normalized = adapter().normalize_external(&raw).unwrap();
        assert_eq!(normalized.kind, EventKind::Refund);
        assert_eq!(normalized.original_payment_id.as_deref(), Some("pay-1"));
        assert!(normalized.finished);
    }

    #[test]
    fn malformed_external_records_are_errors_not_panics() {
        let raw = serde_json::json!({ "id": "pay-9", "status": "succeeded" });
        let err = adapter().normalize_external(&raw).unwrap_err();
        assert!(matches!(err, ProviderError::MissingField(_)));
    }
}
