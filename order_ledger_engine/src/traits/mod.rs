//! The abstraction seams of the engine.
//!
//! [`LedgerDatabase`] is what a storage backend must provide; the engine's
//! public API is generic over it. [`ProviderAdapter`] is what a concrete
//! payment-gateway integration must provide; adapters are registered in a
//! [`ProviderRegistry`] keyed by [`crate::db_types::ProviderTag`] and
//! dispatched dynamically.
mod data_objects;
mod ledger_database;
mod provider;

pub use data_objects::{ApplyOutcome, StuckOrderRef, TickSummary};
pub use ledger_database::{LedgerDatabase, LedgerError};
pub use provider::{
    CreatePaymentRequest,
    NormalizedTransaction,
    PaymentInit,
    ProviderAdapter,
    ProviderError,
    ProviderRegistry,
    RefundBatchOutcome,
    RefundTask,
};
