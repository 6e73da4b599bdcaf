use thiserror::Error;

use crate::db_types::UserId;

#[derive(Debug, Error)]
pub enum SqliteDatabaseError {
    #[error("Database connection error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Database query error: {0}")]
    QueryError(String),
    #[error("Account not found: {0}")]
    AccountNotFound(UserId),
    #[error("Order not found: {0}")]
    OrderNotFound(i64),
    #[error("Payment session {0} is already linked to another order")]
    DuplicatePaymentSession(String),
    #[error("Could not allocate a unique order number after {0} attempts")]
    OrderIdExhausted(usize),
}
