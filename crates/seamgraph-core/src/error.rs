use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeamGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("CDC unavailable: {0}")]
    CdcUnavailable(String),

    #[error("External store unavailable: {0}")]
    ExternalStoreUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SeamGraphError>;
