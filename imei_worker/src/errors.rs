use imei_engine::{JobQueueError, SqliteDatabaseError};
use lookup_tools::LookupApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Could not initialize the worker. {0}")]
    InitializeError(String),
    #[error("Invalid worker configuration. {0}")]
    ConfigurationError(String),
    #[error("Database error. {0}")]
    DatabaseError(#[from] SqliteDatabaseError),
    #[error("Could not create the lookup provider client. {0}")]
    LookupClientError(#[from] LookupApiError),
    #[error("Job queue error. {0}")]
    JobQueueError(#[from] JobQueueError),
    #[error("An I/O error happened in the worker. {0}")]
    IOError(#[from] std::io::Error),
}
