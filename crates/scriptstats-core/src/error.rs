use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}
