//! IMEI Verification Engine
//!
//! The engine takes a device identifier (IMEI) from a registered user or a paying guest, charges for it, and runs the
//! verification against a paid third-party lookup provider in the background. The result is a structured device
//! report with a risk assessment. This library contains the core logic and is independent of any web framework.
//!
//! The library is divided into these sections:
//! 1. Database management and control ([`mod@traits`], [`SqliteDatabase`]). SQLite is the supported backend. You
//!    should never need to access the database directly. Instead, use the public API provided by the engine. The
//!    exception is the data types used in the database. These are defined in the [`mod@db_types`] module and are
//!    public.
//! 2. The domain rules: the brand registry ([`mod@brands`]), pricing ([`mod@pricing`]), report extraction
//!    ([`mod@reports`]) and risk scoring ([`mod@risk`]).
//! 3. Talking to the provider: per-service rate limiting ([`mod@throttle`]) and the fallback-aware lookup gateway
//!    ([`mod@gateway`]).
//! 4. The engine's public API ([`mod@engine_api`]): order submission, the ledger, the job queue, the order processor and
//!    payment reconciliation.
//!
//! The engine also emits events when an order completes, when it fails, and when a guest payment is confirmed.
//! Subscribe to them with [`events::EventHooks`] to deliver results or send notifications.
mod db;

pub mod brands;
pub mod db_types;
pub mod engine_api;
pub mod events;
pub mod gateway;
pub mod pricing;
pub mod reports;
pub mod risk;
pub mod throttle;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use db::sqlite::{SqliteDatabase, SqliteDatabaseError};
pub use db::traits;
pub use db::traits::{
    InsertJobResult,
    InsertOrderResult,
    JobStore,
    LedgerManagement,
    OrderManagement,
    PriceOverrideStore,
    VerificationDatabase,
};
pub use engine_api::{
    errors::{JobQueueError, LedgerError, OrderProcessorError, ReconcilerError, SubmissionError},
    job_queue::{BackoffPolicy, EnqueueResult, JobHandler, JobOutcome, JobQueue, JobQueueConfig, JobSink},
    ledger_api::{LedgerApi, LedgerAudit, PurchaseResult},
    order_processor::{OrderProcessor, ProcessOutcome},
    payment_reconciler::{GuestPaymentResult, PaymentReconciler},
    submission_api::{GuestRequest, OrderSubmissionApi, VerificationRequest},
};
