//! Vector collection abstraction.
//!
//! The [`VectorCollection`] trait defines every operation the index manager
//! needs from a vector store, so backends (SQLite, in-memory) are pluggable.
//! Entries are keyed by content identity (see
//! [`chunk_identity`](crate::models::chunk_identity)).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkMetadata, DocType, DocumentChunk};

/// A chunk with its identity and embedding, ready to store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
}

/// A stored entry returned from a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: String,
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// What a collection was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub dims: usize,
    /// Embedding model name as reported by the provider.
    pub model: String,
}

impl CollectionInfo {
    /// Whether vectors from `model` with `dims` can be mixed with the stored ones.
    pub fn is_compatible(&self, model: &str, dims: usize) -> bool {
        self.dims == dims && self.model == model
    }
}

/// Equality filters over chunk metadata. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub doc_type: Option<DocType>,
    pub source: Option<String>,
    pub has_code: Option<bool>,
}

impl MetadataFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn doc_type(doc_type: DocType) -> Self {
        Self {
            doc_type: Some(doc_type),
            ..Self::default()
        }
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        self.doc_type.map_or(true, |t| t == meta.doc_type)
            && self.source.as_deref().map_or(true, |s| s == meta.source)
            && self.has_code.map_or(true, |c| c == meta.has_code)
    }
}

/// Abstract persistent vector collection.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorCollection::ensure_collection) | Create the collection for a model and vector dimension |
/// | [`info`](VectorCollection::info) | Model and dimension the collection was built with |
/// | [`upsert`](VectorCollection::upsert) | Insert or replace entries by identity |
/// | [`existing_ids`](VectorCollection::existing_ids) | Which of the given identities are stored |
/// | [`query`](VectorCollection::query) | Filtered nearest-neighbour search |
/// | [`delete`](VectorCollection::delete) | Remove entries by identity |
/// | [`reset`](VectorCollection::reset) | Drop the collection entirely |
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Model and dims of the collection, `None` if it has not been created.
    async fn info(&self) -> Result<Option<CollectionInfo>>;

    /// Whether the collection has been created.
    async fn exists(&self) -> Result<bool> {
        Ok(self.info().await?.is_some())
    }

    /// Create the collection if missing. Fails if it exists with another
    /// model or other dims.
    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<()>;

    /// Insert or replace entries. Fails if the collection does not exist.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// The subset of `ids` already stored.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Every stored identity.
    async fn all_ids(&self) -> Result<HashSet<String>>;

    /// Up to `k` entries matching `filter`, most similar first.
    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<ScoredEntry>>;

    /// Delete entries by identity, returning how many were removed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;

    /// Entry counts per document type.
    async fn count_by_doc_type(&self) -> Result<Vec<(DocType, usize)>>;

    /// Drop the collection and all its entries.
    async fn reset(&self) -> Result<()>;

    /// Release backend resources.
    async fn close(&self) {}
}

/// Rank scored entries by score (desc), then identity (asc).
pub fn rank(entries: &mut Vec<ScoredEntry>, k: usize) {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    entries.truncate(k);
}
