//! Error types for HookRelay
//!
//! Custom error enum that wraps all possible error types in the application.

use thiserror::Error;

/// Main error type for HookRelay operations
#[derive(Debug, Error)]
pub enum Error {
    /// Database errors (SQLite via sqlx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Outbound HTTP errors (delivery client, advisor client)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Delivery pipeline errors
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for HookRelay operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("DATABASE_URL not set".to_string());
        assert_eq!(err.to_string(), "Configuration error: DATABASE_URL not set");
    }

    #[test]
    fn test_error_conversion() {
        // Test that sqlx errors convert properly
        let sql_err = sqlx::Error::RowNotFound;
        let our_err: Error = sql_err.into();
        assert!(matches!(our_err, Error::Database(_)));
    }
}
