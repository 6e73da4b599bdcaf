//! #  Database management and control.
//!
//! This module defines the contracts that a storage backend must fulfil to host the verification engine.
//!
//! Every trait extends [`VerificationDatabase`], which fixes the backend's error type. Operations that must be atomic
//! are expressed as single trait methods, so that each backend can implement them as one database transaction:
//! * [`OrderManagement`] stores orders and drives their status changes. Creating an order together with its debit,
//!   finalising an order together with its adjustment or refund, and rolling an order back together with its refund
//!   are each one atomic operation.
//! * [`LedgerManagement`] owns user balances and the append-only credit ledger. Every balance change is stored with
//!   exactly one ledger entry.
//! * [`JobStore`] is the durable queue behind the job queue.
//! * [`PriceOverrideStore`] holds administrator price overrides. It is independent of the others, so
//!   pricing can be backed by any store.
mod data_objects;
mod job_store;
mod ledger_management;
mod order_management;
mod price_override_store;

use std::fmt::Debug;

pub use data_objects::{InsertJobResult, InsertOrderResult};
pub use job_store::JobStore;
pub use ledger_management::LedgerManagement;
pub use order_management::OrderManagement;
pub use price_override_store::PriceOverrideStore;

pub trait VerificationDatabase: Clone + Debug + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The URL of the database
    fn url(&self) -> &str;
}
