use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::*;
use ofl_common::Amount;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    config::YookassaConfig,
    data_objects::{ListPage, MoneyAmount, YookassaPayment, YookassaRefund},
    YookassaApiError,
};

/// Hard ceiling on cursor-pagination, in case the gateway misbehaves.
const MAX_PAGES: usize = 50;
const PAGE_LIMIT: &str = "100";

#[derive(Clone)]
pub struct YookassaApi {
    config: YookassaConfig,
    client: Arc<Client>,
}

impl YookassaApi {
    pub fn new(config: YookassaConfig) -> Result<Self, YookassaApiError> {
        let client = Client::builder().build().map_err(|e| YookassaApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<B>,
        idempotence_key: Option<&str>,
    ) -> Result<T, YookassaApiError> {
        let url = self.url(path);
        trace!("Sending REST query: {url}");
        let mut req = self
            .client
            .request(method, url)
            .basic_auth(&self.config.shop_id, Some(self.config.secret_key.reveal()));
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        // Mutating calls must carry an idempotence key so a retried request
        // cannot create a second payment or refund.
        if let Some(key) = idempotence_key {
            req = req.header("Idempotence-Key", key);
        }
        let response = req.send().await.map_err(|e| YookassaApiError::RestResponseError(e.to_string()))?;
        if response.status().is_success() {
            trace!("REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| YookassaApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| YookassaApiError::RestResponseError(e.to_string()))?;
            Err(YookassaApiError::QueryError { status, message })
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<YookassaPayment, YookassaApiError> {
        let path = format!("/payments/{payment_id}");
        self.rest_query::<YookassaPayment, ()>(Method::GET, &path, &[], None, None).await
    }

    /// Creates a payment with a hosted-confirmation redirect. The order id
    /// goes into the metadata so webhooks and listings can be routed back.
    pub async fn create_payment(
        &self,
        amount: Amount,
        description: &str,
        order_id: &str,
        return_url: Option<&str>,
    ) -> Result<YookassaPayment, YookassaApiError> {
        let body = serde_json::json!({
            "amount": MoneyAmount::new(amount),
            "capture": true,
            "confirmation": {
                "type": "redirect",
                "return_url": return_url.unwrap_or("https://example.com/checkout/return"),
            },
            "description": description,
            "metadata": { "order_id": order_id },
        });
        debug!("Creating payment of {amount} for order {order_id}");
        let payment = self
            .rest_query::<YookassaPayment, Value>(Method::POST, "/payments", &[], Some(body), Some(&idempotence_key()))
            .await?;
        info!("Created payment [{}] for order {order_id}", payment.id);
        Ok(payment)
    }

    pub async fn create_refund(
        &self,
        payment_id: &str,
        amount: Amount,
        order_id: &str,
    ) -> Result<YookassaRefund, YookassaApiError> {
        let body = serde_json::json!({
            "amount": MoneyAmount::new(amount),
            "payment_id": payment_id,
            "metadata": { "order_id": order_id },
        });
        debug!("Creating refund of {amount} against payment [{payment_id}]");
        let refund = self
            .rest_query::<YookassaRefund, Value>(Method::POST, "/refunds", &[], Some(body), Some(&idempotence_key()))
            .await?;
        info!("Created refund [{}] for order {order_id}", refund.id);
        Ok(refund)
    }

    /// All payments created at or after `since`, as raw records, following
    /// the listing cursor until it runs out.
    pub async fn list_payments_since(&self, since: DateTime<Utc>) -> Result<Vec<Value>, YookassaApiError> {
        self.list_since("/payments", since).await
    }

    /// All refunds created at or after `since`, as raw records.
    pub async fn list_refunds_since(&self, since: DateTime<Utc>) -> Result<Vec<Value>, YookassaApiError> {
        self.list_since("/refunds", since).await
    }

    async fn list_since(&self, path: &str, since: DateTime<Utc>) -> Result<Vec<Value>, YookassaApiError> {
        let since = since.to_rfc3339();
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut params: Vec<(&str, &str)> = vec![("created_at.gte", since.as_str()), ("limit", PAGE_LIMIT)];
            if let Some(cursor) = cursor.as_deref() {
                params.push(("cursor", cursor));
            }
            let page = self.rest_query::<ListPage<Value>, ()>(Method::GET, path, &params, None, None).await?;
            records.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(records),
            }
        }
        warn!("Listing {path} hit the {MAX_PAGES}-page ceiling; returning what was collected");
        Ok(records)
    }
}

fn idempotence_key() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
