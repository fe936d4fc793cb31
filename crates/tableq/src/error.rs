//! Error types and result handling for tableq.
//!
//! This module defines the core error type [`Error`] used throughout the crate, as well as the [`Result`] alias for fallible operations.
//!
//! ## What
//!
//! - [`Error`] enumerates the hard failures of tableq: database, connectivity, serialization, configuration and schema errors.
//! - [`Result<T>`] is a convenient alias for `Result<T, Error>`.
//!
//! "Nothing available" and "already gone" are not errors. A reservation that times out
//! returns `Ok(None)`, and `finish` on a vanished message returns `Ok(false)`.
//!
//! ### Example
//!
//! ```rust
//! use tableq::error::{Error, Result};
//!
//! fn check() -> Result<()> {
//!     Err(Error::QueueNotSetUp {
//!         queue: "emails".to_string(),
//!         table: "tableq_emails".to_string(),
//!     })
//! }
//! ```
use thiserror::Error;

/// Result type for tableq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type for heterogeneous error sources
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for tableq operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (SQLx errors)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Required configuration field is missing
    #[error("Missing required configuration: {field}")]
    MissingConfig { field: String },

    /// Configuration field has an invalid value
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    /// Database connection could not be established or re-established
    #[error("Database connection failed: {source}. Context: {context}")]
    ConnectionFailed { source: BoxError, context: String },

    /// SQL statement failed
    #[error("Database query failed: {query}. Context: {context}. Source: {source}")]
    QueryFailed {
        source: BoxError,
        query: String,
        context: String,
    },

    /// A statement referenced a table that does not exist.
    ///
    /// Raised by stores; the queue engine turns it into [`Error::QueueNotSetUp`].
    #[error("Table missing while running {query}: {source}")]
    MissingTable { source: BoxError, query: String },

    /// Creating the backing table failed
    #[error("Failed to create queue table '{table}': {source}")]
    SchemaSetup { table: String, source: BoxError },

    /// The backing table of a queue does not exist
    #[error("Queue '{queue}' is not set up (table '{table}' does not exist). Run setup first")]
    QueueNotSetUp { queue: String, table: String },
}

impl Error {
    /// Whether this error means the referenced table does not exist.
    pub fn is_missing_table(&self) -> bool {
        matches!(self, Error::MissingTable { .. } | Error::QueueNotSetUp { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_not_set_up_names_queue_and_table() {
        let err = Error::QueueNotSetUp {
            queue: "emails".into(),
            table: "tableq_emails".into(),
        };
        let text = err.to_string();
        assert!(text.contains("'emails'"));
        assert!(text.contains("tableq_emails"));
        assert!(text.contains("Run setup"));
        assert!(err.is_missing_table());
    }

    #[test]
    fn query_failure_is_not_missing_table() {
        let err = Error::QueryFailed {
            source: "boom".into(),
            query: "SELECT 1".into(),
            context: "probe".into(),
        };
        assert!(!err.is_missing_table());
    }
}
