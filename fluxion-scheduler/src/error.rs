//! Scheduler error type

use fluxion_core::ConnectUrlError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing entity for the given owner, e.g. `atom 3`
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(kind: &str, key: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{} {}", kind, key))
    }
}

impl From<ConnectUrlError> for Error {
    fn from(err: ConnectUrlError) -> Self {
        Error::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
