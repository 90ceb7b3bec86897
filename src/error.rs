//! Error types for the indexing store.
//!
//! Expected absence (a path or word that is not indexed yet) is represented
//! with `Option`/empty collections, never as an error. Everything surfaced
//! through [`StoreError`] is either a storage fault, a cooperative
//! cancellation, or a misuse the caller must fix.

use thiserror::Error;

/// Indexing store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Counts cache read before initialization")]
    CountsNotInitialized,

    #[error("Invalid update kind: {0}")]
    InvalidUpdateKind(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store corruption: {0}")]
    Corrupted(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
