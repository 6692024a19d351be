//! YooKassa integration for the order ledger.
//!
//! [`YookassaApi`] is a thin REST v3 client (payments, refunds, cursor
//! pagination, idempotence keys). [`YookassaAdapter`] wraps it to implement
//! the engine's `ProviderAdapter` boundary: webhook verification and
//! normalization, and the external-transaction listing that reconciliation
//! feeds on.
mod adapter;
mod api;
mod config;
mod data_objects;
mod error;
mod helpers;

pub use adapter::YookassaAdapter;
pub use api::YookassaApi;
pub use config::YookassaConfig;
pub use data_objects::{
    Confirmation,
    ListPage,
    MoneyAmount,
    WebhookNotification,
    YookassaPayment,
    YookassaRefund,
};
pub use error::YookassaApiError;
pub use helpers::{format_money, parse_money};
