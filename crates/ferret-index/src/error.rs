//! Error types for ferret-index.

use std::num::TryFromIntError;

use crate::config::ConfigError;
use crate::embed::ProviderError;
use crate::store::StoreError;

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Embedding provider error.
    #[error("embedding error: {0}")]
    Provider(#[from] ProviderError),

    /// Vector store error.
    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    /// Lexical index error.
    #[error("lexical index error: {0}")]
    Lexical(#[from] tantivy::TantivyError),

    /// Snapshot references vectors that are no longer stored.
    #[error("snapshot inconsistent for {path}: {reason}")]
    SnapshotInconsistency { path: String, reason: String },

    /// Filesystem walk error.
    #[error("walk error: {0}")]
    Walk(#[from] ignore::Error),

    /// Both retrieval paths failed.
    #[error("search failed: lexical: {lexical}; vector: {vector}")]
    SearchFailed { lexical: String, vector: String },

    /// A background task panicked or was aborted.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// The run was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
