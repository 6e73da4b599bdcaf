use imei_common::Credits;
use thiserror::Error;

use crate::{db_types::ImeiError, db_types::UserId, pricing::PricingError};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Amounts must be positive, but {0} was given")]
    InvalidAmount(Credits),
    #[error("A credit cannot be recorded as {0}")]
    InvalidTransactionType(String),
    #[error("Insufficient funds. The balance is {balance}, but {required} is required")]
    InsufficientFunds { balance: Credits, required: Credits },
    #[error("Account not found: {0}")]
    AccountNotFound(UserId),
}

#[derive(Debug, Clone, Error)]
pub enum JobQueueError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("The job queue is not accepting work: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum SubmissionError {
    #[error("Invalid IMEI: {0}")]
    InvalidImei(#[from] ImeiError),
    #[error("Unknown brand: {0}")]
    UnknownBrand(String),
    #[error("{0}")]
    PricingError(#[from] PricingError),
    #[error("Insufficient funds. The balance is {balance}, but {required} is required")]
    InsufficientFunds { balance: Credits, required: Credits },
    #[error("Account not found: {0}")]
    AccountNotFound(UserId),
    #[error("The order could not be queued and was rolled back: {0}")]
    EnqueueFailed(String),
    #[error("Order #{order_ref} could not be queued ({enqueue_error}) and rolling it back failed: {reason}")]
    RollbackFailed { order_ref: i64, enqueue_error: String, reason: String },
    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[derive(Debug, Clone, Error)]
pub enum ReconcilerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("No order is linked to payment session {0}")]
    UnknownSession(String),
    #[error("The paid order could not be queued: {0}")]
    EnqueueFailed(String),
    #[error("{0}")]
    LedgerError(#[from] LedgerError),
}

#[derive(Debug, Clone, Error)]
pub enum OrderProcessorError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("{0}")]
    PricingError(#[from] PricingError),
}
