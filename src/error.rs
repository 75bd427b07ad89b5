//! Error taxonomy for the ingestion and query pipelines.
//!
//! [`StorageError`] is what the document store returns. [`CorpusError`]
//! classifies every per-file and per-query failure; the pipelines catch it at
//! their boundary and turn it into an outcome value instead of aborting a
//! batch or another query.

use thiserror::Error;

use crate::models::DocumentStatus;

/// Failure of a single document-store operation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no document record for '{0}'")]
    NotFound(String),

    #[error("document '{filename}' cannot move from {from} to {to}")]
    InvalidTransition {
        filename: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("corrupt document record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum CorpusError {
    /// Source could not be converted, or converted to nothing.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Metadata extraction failed. Never fatal for ingestion.
    #[error("metadata extraction failed: {0}")]
    Extraction(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("reranker unavailable: {0}")]
    RerankerLoad(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CorpusError {
    pub fn index(err: impl std::fmt::Display) -> Self {
        CorpusError::Index(err.to_string())
    }
}
