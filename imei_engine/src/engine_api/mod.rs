//! The public API of the verification engine.
//!
//! Each API object wraps a storage backend (and whatever collaborators it needs) and exposes one use case:
//! * [`ledger_api::LedgerApi`]: balances, debits, credits and credit purchases.
//! * [`job_queue::JobQueue`]: the durable, idempotent, retrying dispatcher.
//! * [`submission_api::OrderSubmissionApi`]: creates orders, charges them and queues them.
//! * [`payment_reconciler::PaymentReconciler`]: applies payment confirmations for guest orders and credit purchases.
//! * [`order_processor::OrderProcessor`]: runs the verification for one order and drives it into a terminal state.
pub mod errors;
pub mod job_queue;
pub mod ledger_api;
pub mod order_processor;
pub mod payment_reconciler;
pub mod submission_api;
