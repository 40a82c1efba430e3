//! In-memory [`VectorCollection`] for tests and ephemeral use.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Queries are brute-force
//! cosine similarity over all stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::DocType;

use super::{rank, CollectionInfo, IndexEntry, MetadataFilter, ScoredEntry, VectorCollection};

struct CollectionState {
    info: CollectionInfo,
    entries: HashMap<String, IndexEntry>,
}

/// In-memory collection. Starts out not created.
pub struct InMemoryCollection {
    name: String,
    state: RwLock<Option<CollectionState>>,
}

impl InMemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(None),
        }
    }
}

impl Default for InMemoryCollection {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<Option<CollectionInfo>> {
        Ok(self.state.read().unwrap().as_ref().map(|s| s.info.clone()))
    }

    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        match state.as_ref() {
            Some(existing) if !existing.info.is_compatible(model, dims) => bail!(
                "collection '{}' was built with {} ({} dims), requested {} ({} dims)",
                self.name,
                existing.info.model,
                existing.info.dims,
                model,
                dims
            ),
            Some(_) => Ok(()),
            None => {
                *state = Some(CollectionState {
                    info: CollectionInfo {
                        dims,
                        model: model.to_string(),
                    },
                    entries: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let Some(state) = guard.as_mut() else {
            bail!("collection '{}' does not exist", self.name);
        };
        for entry in entries {
            if entry.embedding.len() != state.info.dims {
                bail!(
                    "embedding for {} has {} dims, collection expects {}",
                    entry.id,
                    entry.embedding.len(),
                    state.info.dims
                );
            }
        }
        for entry in entries {
            state.entries.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let guard = self.state.read().unwrap();
        let Some(state) = guard.as_ref() else {
            bail!("collection '{}' does not exist", self.name);
        };
        Ok(ids
            .iter()
            .filter(|id| state.entries.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn all_ids(&self) -> Result<HashSet<String>> {
        let guard = self.state.read().unwrap();
        Ok(guard
            .as_ref()
            .map(|s| s.entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let guard = self.state.read().unwrap();
        let Some(state) = guard.as_ref() else {
            bail!("collection '{}' does not exist", self.name);
        };
        let mut scored: Vec<ScoredEntry> = state
            .entries
            .values()
            .filter(|e| filter.matches(&e.chunk.metadata))
            .map(|e| ScoredEntry {
                id: e.id.clone(),
                chunk: e.chunk.clone(),
                embedding: e.embedding.clone(),
                score: cosine_similarity(vector, &e.embedding),
            })
            .collect();
        rank(&mut scored, k);
        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut guard = self.state.write().unwrap();
        let Some(state) = guard.as_mut() else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| state.entries.remove(*id).is_some())
            .count())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .state
            .read()
            .unwrap()
            .as_ref()
            .map_or(0, |s| s.entries.len()))
    }

    async fn count_by_doc_type(&self) -> Result<Vec<(DocType, usize)>> {
        let guard = self.state.read().unwrap();
        Ok(DocType::ALL
            .iter()
            .map(|t| {
                let n = guard.as_ref().map_or(0, |s| {
                    s.entries
                        .values()
                        .filter(|e| e.chunk.metadata.doc_type == *t)
                        .count()
                });
                (*t, n)
            })
            .collect())
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().unwrap() = None;
        Ok(())
    }
}
