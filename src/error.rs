//! Error taxonomy for the ingestion and query pipeline.
//!
//! Provider failures use [`ProviderError`] from the core crate. Query-time
//! errors never escape the router: they become a degraded answer.

use thiserror::Error;

pub use scriptdocs_core::error::ProviderError;

/// Rejected user input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("question is missing")]
    Missing,
    #[error("question is not a string")]
    NotAString,
    #[error("question is empty")]
    Empty,
}

impl ValidationError {
    /// Fixed answer for any invalid question.
    pub const USER_MESSAGE: &'static str = "Please provide a valid question.";
}

/// Failure while turning one source file into chunks. Retried per file.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to read {source_path}: {cause}")]
    Read {
        source_path: String,
        cause: std::io::Error,
    },

    #[error("{source_path} is not valid UTF-8")]
    InvalidUtf8 { source_path: String },

    #[error("{source_path} produced no valid chunks ({rejected} rejected)")]
    NoValidChunks { source_path: String, rejected: usize },
}

/// Failure of a whole ingestion run.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to scan knowledge base: {0}")]
    Scan(#[source] anyhow::Error),

    #[error("no chunks produced from {total_files} files ({failed_files} failed)")]
    Empty {
        total_files: usize,
        failed_files: usize,
    },
}

/// Failure inside the vector index manager.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("vector store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("embedding count mismatch: sent {sent}, received {received}")]
    EmbeddingMismatch { sent: usize, received: usize },

    #[error(
        "collection '{collection}' was built with {found_model} ({found_dims} dims), \
         provider is {model} ({dims} dims)"
    )]
    IncompatibleCollection {
        collection: String,
        found_model: String,
        found_dims: usize,
        model: String,
        dims: usize,
    },

    #[error(transparent)]
    Ingestion(#[from] IngestionError),
}

/// Failure while answering a question.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("internal error: {0}")]
    Internal(String),
}
