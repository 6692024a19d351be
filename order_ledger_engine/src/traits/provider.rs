use std::{collections::HashMap, net::IpAddr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ofl_common::Amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    db_types::{Actor, EventKind, NewFinancialEvent, OrderId, PaymentMethod, ProviderTag},
    traits::StuckOrderRef,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Could not initialize the gateway client: {0}")]
    Initialization(String),
    #[error("Gateway request failed: {0}")]
    Network(String),
    #[error("Gateway returned an error. Status {status}. {message}")]
    Api { status: u16, message: String },
    #[error("Could not deserialize the gateway response: {0}")]
    Json(String),
    #[error("Gateway record is missing mandatory field '{0}'")]
    MissingField(String),
    #[error("Malformed gateway record: {0}")]
    MalformedRecord(String),
}

/// A gateway transaction in the one shape the core understands, whatever the
/// provider's wire format looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTransaction {
    pub provider: ProviderTag,
    #[serde(rename = "transactionType")]
    pub kind: EventKind,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_payment_id: Option<String>,
    pub amount: Amount,
    /// The gateway considers this transaction settled (successfully or not).
    pub finished: bool,
    /// The gateway reported failure: clean up the pending attempt, append
    /// nothing.
    pub mark_as_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
}

impl NormalizedTransaction {
    /// The ledger entry this gateway transaction corresponds to.
    pub fn to_new_event(&self, order_id: OrderId, actor: Actor) -> NewFinancialEvent {
        NewFinancialEvent {
            order_id,
            kind: self.kind,
            method: PaymentMethod::CardOnline,
            provider: Some(self.provider),
            amount: self.amount,
            transaction_id: Some(self.transaction_id.clone()),
            original_payment_id: self.original_payment_id.clone(),
            actor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub order_id: OrderId,
    pub amount: Amount,
    pub description: String,
    /// Where the gateway should send the customer after the hosted payment
    /// page.
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentInit {
    pub payment_id: String,
    pub confirmation_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundTask {
    pub order_id: OrderId,
    pub payment_id: String,
    pub amount: Amount,
}

/// Each refund task in a batch succeeds or fails on its own.
#[derive(Debug, Clone, Default)]
pub struct RefundBatchOutcome {
    pub refund_ids: Vec<String>,
    pub errors: Vec<ProviderError>,
}

/// What a concrete payment-gateway integration must supply. The core never
/// sees a provider's wire format: raw records cross this boundary as opaque
/// JSON and come back as [`NormalizedTransaction`]s.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn tag(&self) -> ProviderTag;

    /// Starts a payment on the gateway, returning its id and the hosted
    /// confirmation page URL.
    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<PaymentInit, ProviderError>;

    /// Submits a batch of refunds. Partial-failure tolerant: one rejected
    /// task does not abort the rest.
    async fn create_refund(&self, tasks: &[RefundTask]) -> RefundBatchOutcome;

    /// Whether a webhook delivery genuinely originates from this gateway
    /// (e.g. source-IP allow-listing). Called before any payload parsing.
    fn verify_webhook_authenticity(&self, remote_ip: IpAddr) -> bool;

    /// Parses a webhook payload into the canonical shape, or `None` when the
    /// payload carries nothing the ledger cares about.
    fn normalize_webhook(&self, payload: &Value) -> Option<NormalizedTransaction>;

    /// Lists the gateway-side payments and refunds that could belong to the
    /// given stuck orders, from `since` onwards. Paginated internally;
    /// returns the raw provider records.
    async fn fetch_external(&self, stuck: &[StuckOrderRef], since: DateTime<Utc>) -> Result<Vec<Value>, ProviderError>;

    /// Converts one raw record from [`Self::fetch_external`] into the
    /// canonical shape. A finished record with mandatory fields missing is
    /// an error (the caller flags it for manual review).
    fn normalize_external(&self, raw: &Value) -> Result<NormalizedTransaction, ProviderError>;
}

/// The typed adapter registry. Provider identity is an enumerated tag, so an
/// unknown provider cannot get past configuration loading.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderTag, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> &mut Self {
        self.adapters.insert(adapter.tag(), adapter);
        self
    }

    pub fn get(&self, tag: ProviderTag) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&tag).cloned()
    }

    pub fn tags(&self) -> Vec<ProviderTag> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
