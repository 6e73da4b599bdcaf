use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LookupApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Request to the lookup provider failed: {0}")]
    RequestFailed(String),
    #[error("Request to the lookup provider timed out")]
    Timeout,
    #[error("Invalid response from the lookup provider: {0}")]
    ResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("The provider rejected the lookup on service {service}: {message}")]
    Rejected { service: u16, message: String },
}
