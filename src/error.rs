//! Типы ошибок хранилища и транспорта.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Ошибки чат-транспорта, которые вызывающий код различает.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Flood control: too many requests")]
    RateLimited,
    #[error("Bot was blocked by the user")]
    Blocked,
    #[error("Message not found")]
    MessageNotFound,
    #[error("Message is not modified")]
    NotModified,
    #[error("Transport error: {0}")]
    Other(String),
}
