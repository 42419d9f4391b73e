//! Error types for the Redis data store
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for data store operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Store has been closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Write Contention Errors
    // -------------------------------------------------------------------------
    #[error("Concurrent modification: no decisive outcome after {attempts} attempts")]
    ConcurrentModification { attempts: usize },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Big Segment Errors
    // -------------------------------------------------------------------------
    #[error("Big segment metadata has never been synchronized")]
    MissingMetadata,

    #[error("Invalid big segment metadata: {0}")]
    InvalidMetadata(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data kind name: {0}")]
    InvalidKind(String),
}

impl StoreError {
    /// Whether this error came from talking to the backing engine
    /// (as opposed to a logical or configuration failure).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StoreError::Redis(_) | StoreError::Backend(_) | StoreError::Closed
        )
    }
}
