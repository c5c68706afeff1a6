//! Error type for store, config and persistence operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavError {
    /// Rejected at the store boundary (empty user id, empty item name, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to parse config: {0}")]
    ConfigRead(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, NavError>;
