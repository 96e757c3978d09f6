use common::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Persistence write error: {0}")]
    PersistenceWrite(#[from] AppError),
    #[error("Worker initialization error: {0}")]
    WorkerInit(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),
}

impl From<redis::RedisError> for JobError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            Self::BrokerUnavailable(err.to_string())
        } else {
            Self::Broker(err.to_string())
        }
    }
}
