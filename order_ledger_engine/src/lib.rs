//! Order Financial Ledger engine
//!
//! The engine keeps the append-only record of money movements against a store
//! order, derives an order's financial position from that record, and gates
//! which financial and fulfilment actions are legal at any point in the
//! order's life. It is provider-agnostic: payment gateways plug in behind the
//! [`traits::ProviderAdapter`] boundary.
//!
//! The library is divided into three main sections:
//! 1. The domain core: [`db_types`] (orders, ledger events, enums),
//!    [`financials`] (the pure reducer from event history to financial
//!    state), [`status`] (the per-delivery-method step machine) and
//!    [`online`] (bookkeeping for an in-flight gateway round-trip).
//! 2. Storage: the [`traits::LedgerDatabase`] trait and its SQLite
//!    implementation. All mutations (append, void, status change) run inside
//!    a single database transaction, so concurrent readers observe the
//!    check, the append and the recompute as one unit.
//! 3. Background work: [`reconciliation`] resolves online transactions whose
//!    outcome was never confirmed by a webhook, by polling the provider and
//!    driving the same applier path the live request path uses.
//!
//! The engine also emits events through a small hook system ([`events`]) so
//! that live dashboards can subscribe to order updates without the core
//! knowing anything about the delivery transport.
pub mod db_types;
pub mod events;
pub mod financials;
pub mod helpers;
pub mod online;
pub mod reconciliation;
pub mod status;
pub mod traits;

mod ofl_api;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

pub use ofl_api::OrderFlowApi;
