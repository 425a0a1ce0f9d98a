//! Error types for the DAP client runtime

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("session is not active")]
    SessionNotActive,

    #[error("failed to launch adapter process: {0}")]
    ProcessLaunchFailed(String),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("configuration not found: {0}")]
    ConfigurationNotFound(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Error> for String {
    fn from(error: Error) -> Self {
        error.to_string()
    }
}
