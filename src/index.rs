//! Vector index manager.
//!
//! Owns the vector collection and the embedding provider, and is the only
//! writer to the index. Indexing is incremental by default: chunks are keyed
//! by content identity, so only chunks whose identity is not yet stored are
//! embedded. Embedding happens in fixed-size batches with a pause between
//! batches; a failed batch is logged and skipped.
//!
//! # Persistence
//!
//! With `index.enable_cache = true` the index is a SQLite file under
//! `index.cache_dir` and survives restarts. Otherwise it lives in a
//! temporary directory that is removed on [`VectorIndexManager::shutdown`]
//! or drop. Each temporary directory holds an exclusive lock on a marker
//! file for as long as its manager lives; directories left behind by crashed
//! runs have no live lock and are swept by
//! [`VectorIndexManager::cleanup_stale_temp_dirs`].
//!
//! The collection records the embedding model and vector size it was built
//! with. An index built by a different model is rebuilt rather than extended.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scriptdocs_core::embedding::EmbeddingProvider;
use scriptdocs_core::models::{DocType, DocumentChunk};
use scriptdocs_core::search::mmr_rerank;
use scriptdocs_core::store::{
    CollectionInfo, IndexEntry, MetadataFilter, ScoredEntry, VectorCollection,
};

use crate::config::{Config, IndexConfig, RetrievalConfig, RetrievalMode};
use crate::error::IndexError;
use crate::loader::DocumentLoader;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::sqlite_store::SqliteCollection;
use crate::{db, migrate};

/// Prefix of disposable index directories in the system temp dir.
pub const TEMP_DIR_PREFIX: &str = "scriptdocs-index-";

/// File name of the SQLite index inside its storage directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Marker file locked by the process using a temporary index directory.
pub const LOCK_FILE: &str = ".lock";

/// A temporary index directory, locked for the lifetime of this value.
#[derive(Debug)]
pub struct LockedTempDir {
    dir: TempDir,
    lock: File,
}

impl LockedTempDir {
    /// Create a fresh `scriptdocs-index-*` directory in the system temp dir.
    pub fn create() -> std::io::Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    pub fn create_in(root: &Path) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir_in(root)?;
        let lock = File::create(dir.path().join(LOCK_FILE))?;
        lock.try_lock_exclusive()?;
        Ok(Self { dir, lock })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Release the lock and delete the directory.
    pub fn close(self) -> std::io::Result<()> {
        let Self { dir, lock } = self;
        drop(lock);
        dir.close()
    }
}

/// Where the index lives.
#[derive(Debug)]
pub enum IndexStorage {
    Persistent(PathBuf),
    /// Removed when dropped.
    Temporary(LockedTempDir),
    /// Collection supplied by the caller.
    External,
}

impl IndexStorage {
    pub fn path(&self) -> Option<&Path> {
        match self {
            IndexStorage::Persistent(path) => Some(path),
            IndexStorage::Temporary(dir) => Some(dir.path()),
            IndexStorage::External => None,
        }
    }
}

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Distinct chunk identities offered.
    pub candidates: usize,
    pub already_indexed: usize,
    pub indexed: usize,
    pub failed_batches: usize,
    pub failed_chunks: usize,
}

/// Entry counts for the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub total: usize,
    pub by_doc_type: Vec<(DocType, usize)>,
}

/// Chunks retrieved for one question.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalContext {
    /// Single-phase retrieval, in rank order.
    Flat(Vec<DocumentChunk>),
    /// Multi-phase retrieval for code generation, one group per document type.
    Grouped {
        rules: Vec<DocumentChunk>,
        functions: Vec<DocumentChunk>,
        examples: Vec<DocumentChunk>,
    },
}

impl RetrievalContext {
    /// Every chunk, groups in priority order.
    pub fn chunks(&self) -> Vec<&DocumentChunk> {
        match self {
            RetrievalContext::Flat(chunks) => chunks.iter().collect(),
            RetrievalContext::Grouped {
                rules,
                functions,
                examples,
            } => rules.iter().chain(functions).chain(examples).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks().is_empty()
    }
}

pub struct VectorIndexManager {
    collection: Arc<dyn VectorCollection>,
    embedder: Arc<dyn EmbeddingProvider>,
    index_config: IndexConfig,
    retrieval: RetrievalConfig,
    write_lock: Mutex<()>,
    progress: Box<dyn IndexProgressReporter>,
    storage: std::sync::Mutex<Option<IndexStorage>>,
}

impl VectorIndexManager {
    /// Open the SQLite-backed index described by `config.index`.
    pub async fn open(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        let (storage, db_path) = if config.index.enable_cache {
            let dir = config.index.cache_dir.clone();
            let path = dir.join(INDEX_FILE);
            (IndexStorage::Persistent(dir), path)
        } else {
            let dir = LockedTempDir::create()?;
            let path = dir.path().join(INDEX_FILE);
            (IndexStorage::Temporary(dir), path)
        };

        let pool = db::connect(&db_path).await?;
        migrate::run_migrations(&pool).await?;
        info!(path = %db_path.display(), collection = %config.index.collection, "opened vector index");

        let collection = Arc::new(SqliteCollection::new(pool, config.index.collection.clone()));
        let mut manager = Self::with_collection(
            collection,
            embedder,
            config.index.clone(),
            config.retrieval.clone(),
        );
        manager.storage = std::sync::Mutex::new(Some(storage));
        Ok(manager)
    }

    /// Wrap an existing collection. Used by tests and embedders of the library.
    pub fn with_collection(
        collection: Arc<dyn VectorCollection>,
        embedder: Arc<dyn EmbeddingProvider>,
        index_config: IndexConfig,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            collection,
            embedder,
            index_config,
            retrieval,
            write_lock: Mutex::new(()),
            progress: Box::new(NoProgress),
            storage: std::sync::Mutex::new(Some(IndexStorage::External)),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Box<dyn IndexProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn retrieval_config(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Directory holding the index, if it is on disk.
    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| s.path().map(Path::to_path_buf))
    }

    /// Remove unlocked `scriptdocs-index-*` directories in the system temp dir
    /// other than ours.
    pub fn cleanup_stale_temp_dirs(&self) -> usize {
        let own = self.storage_path();
        cleanup_stale_temp_dirs_in(&std::env::temp_dir(), own.as_deref())
    }

    /// Reset the collection and index every chunk.
    pub async fn index(&self, chunks: &[DocumentChunk]) -> Result<IndexReport, IndexError> {
        let _guard = self.write_lock.lock().await;
        self.collection.reset().await?;

        let pending = dedup(chunks);
        let mut report = IndexReport {
            candidates: pending.len(),
            ..IndexReport::default()
        };
        info!(chunks = pending.len(), collection = %self.collection.name(), "rebuilding index");
        self.progress.report(IndexProgressEvent::Planned {
            skipped: 0,
            pending: pending.len() as u64,
        });
        self.write_batches(pending, &mut report).await;
        log_report(&report);
        Ok(report)
    }

    /// Index only chunks whose identity is not already stored.
    ///
    /// Fails with [`IndexError::IncompatibleCollection`] if the collection
    /// was built by another embedding model or with another vector size.
    pub async fn incremental_index(
        &self,
        chunks: &[DocumentChunk],
    ) -> Result<IndexReport, IndexError> {
        let _guard = self.write_lock.lock().await;

        let candidates = dedup(chunks);
        let stored = self.collection.info().await?;
        if let Some(stored) = &stored {
            self.check_compatible(stored)?;
        }
        let existing = if stored.is_some() {
            let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
            self.collection.existing_ids(&ids).await?
        } else {
            HashSet::new()
        };

        let mut report = IndexReport {
            candidates: candidates.len(),
            already_indexed: existing.len(),
            ..IndexReport::default()
        };
        let pending: Vec<(String, DocumentChunk)> = candidates
            .into_iter()
            .filter(|(id, _)| !existing.contains(id))
            .collect();

        info!(
            candidates = report.candidates,
            already_indexed = report.already_indexed,
            pending = pending.len(),
            "incremental indexing"
        );
        self.progress.report(IndexProgressEvent::Planned {
            skipped: report.already_indexed as u64,
            pending: pending.len() as u64,
        });
        self.write_batches(pending, &mut report).await;
        log_report(&report);
        Ok(report)
    }

    /// Load the corpus and bring the index up to date.
    pub async fn get_or_create_vector_store(
        &self,
        loader: &DocumentLoader,
        force_recreate: bool,
    ) -> Result<IndexReport, IndexError> {
        let chunks = loader.load_documents().await?;
        self.sync(&chunks, force_recreate).await
    }

    /// Bring the index up to date with `chunks`.
    ///
    /// Rebuilds from scratch when `force_recreate` is set, when the existing
    /// collection cannot be read, or when it was built by another embedding
    /// model or vector size; otherwise indexes incrementally.
    pub async fn sync(
        &self,
        chunks: &[DocumentChunk],
        force_recreate: bool,
    ) -> Result<IndexReport, IndexError> {
        if force_recreate {
            info!("forced rebuild requested");
            return self.index(chunks).await;
        }

        match self.collection.info().await {
            Ok(Some(info)) => {
                if let Err(e) = self.check_compatible(&info) {
                    warn!(error = %e, "embedding model changed, rebuilding");
                    return self.index(chunks).await;
                }
                match self.incremental_index(chunks).await {
                    Ok(report) => Ok(report),
                    Err(e) => {
                        warn!(error = %e, "existing index unreadable, rebuilding");
                        self.index(chunks).await
                    }
                }
            }
            Ok(None) => {
                info!(collection = %self.collection.name(), "no existing index, creating");
                self.index(chunks).await
            }
            Err(e) => {
                warn!(error = %e, "failed to open index, rebuilding");
                self.index(chunks).await
            }
        }
    }

    /// Delete entries whose identity is not among `current`.
    pub async fn prune_stale(&self, current: &[DocumentChunk]) -> Result<usize, IndexError> {
        let _guard = self.write_lock.lock().await;
        if !self.collection.exists().await? {
            return Ok(0);
        }

        let keep: HashSet<String> = current.iter().map(DocumentChunk::identity).collect();
        let mut stale: Vec<String> = self
            .collection
            .all_ids()
            .await?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        stale.sort();

        let removed = self.collection.delete(&stale).await?;
        info!(removed, "pruned stale index entries");
        Ok(removed)
    }

    pub async fn collection_stats(&self) -> Result<CollectionStats, IndexError> {
        Ok(CollectionStats {
            collection: self.collection.name().to_string(),
            total: self.collection.count().await?,
            by_doc_type: self.collection.count_by_doc_type().await?,
        })
    }

    /// Up to `k` chunks most similar to `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<DocumentChunk>, IndexError> {
        let vector = self.embedder.embed_query(query).await?;
        Ok(into_chunks(self.similar(&vector, filter, k).await?))
    }

    /// Up to `k` chunks re-ranked for diversity with MMR.
    pub async fn retrieve_diverse(
        &self,
        query: &str,
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<DocumentChunk>, IndexError> {
        let vector = self.embedder.embed_query(query).await?;
        Ok(into_chunks(self.diverse(&vector, filter, k).await?))
    }

    /// Single-phase retrieval of `retrieval.top_k` chunks using `mode`.
    pub async fn general_context(
        &self,
        query: &str,
        mode: RetrievalMode,
    ) -> Result<RetrievalContext, IndexError> {
        let vector = self.embedder.embed_query(query).await?;
        let hits = self
            .ranked(&vector, &MetadataFilter::none(), self.retrieval.top_k, mode)
            .await?;
        Ok(RetrievalContext::Flat(into_chunks(hits)))
    }

    /// Rules, then function signatures, then examples, each bounded separately.
    pub async fn code_generation_context(
        &self,
        query: &str,
        mode: RetrievalMode,
    ) -> Result<RetrievalContext, IndexError> {
        let vector = self.embedder.embed_query(query).await?;
        let mut phases = Vec::with_capacity(3);
        for (doc_type, k) in [
            (DocType::Ruleset, self.retrieval.rules_k),
            (DocType::Functions, self.retrieval.functions_k),
            (DocType::Example, self.retrieval.examples_k),
        ] {
            let hits = self
                .ranked(&vector, &MetadataFilter::doc_type(doc_type), k, mode)
                .await?;
            phases.push(into_chunks(hits));
        }
        let examples = phases.pop().unwrap_or_default();
        let functions = phases.pop().unwrap_or_default();
        let rules = phases.pop().unwrap_or_default();
        debug!(
            rules = rules.len(),
            functions = functions.len(),
            examples = examples.len(),
            "code generation context"
        );
        Ok(RetrievalContext::Grouped {
            rules,
            functions,
            examples,
        })
    }

    /// Close the store and remove a temporary index directory.
    pub async fn shutdown(&self) {
        self.collection.close().await;
        let storage = self.storage.lock().unwrap().take();
        if let Some(IndexStorage::Temporary(dir)) = storage {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(path = %path.display(), "removed temporary index"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary index"),
            }
        }
    }

    fn check_compatible(&self, info: &CollectionInfo) -> Result<(), IndexError> {
        let model = self.embedder.model_name();
        let dims = self.embedder.dims();
        if info.is_compatible(model, dims) {
            return Ok(());
        }
        Err(IndexError::IncompatibleCollection {
            collection: self.collection.name().to_string(),
            found_model: info.model.clone(),
            found_dims: info.dims,
            model: model.to_string(),
            dims,
        })
    }

    async fn ranked(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
        mode: RetrievalMode,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        match mode {
            RetrievalMode::Similarity => self.similar(vector, filter, k).await,
            RetrievalMode::Mmr => self.diverse(vector, filter, k).await,
        }
    }

    async fn similar(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if !self.collection.exists().await? {
            warn!(collection = %self.collection.name(), "query against missing collection");
            return Ok(Vec::new());
        }
        Ok(self.collection.query(vector, filter, k).await?)
    }

    async fn diverse(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        let fetch_k = k.saturating_mul(self.retrieval.fetch_k_multiplier.max(1));
        let candidates = self.similar(vector, filter, fetch_k).await?;
        Ok(mmr_rerank(vector, candidates, k, self.retrieval.mmr_lambda))
    }

    async fn write_batches(&self, pending: Vec<(String, DocumentChunk)>, report: &mut IndexReport) {
        let total = pending.len() as u64;
        let batch_size = self.index_config.batch_size.max(1);
        let delay = Duration::from_millis(self.index_config.batch_delay_ms);

        for (i, batch) in pending.chunks(batch_size).enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.write_batch(batch).await {
                Ok(()) => {
                    report.indexed += batch.len();
                    self.progress.report(IndexProgressEvent::Embedded {
                        n: report.indexed as u64,
                        total,
                    });
                }
                Err(e) => {
                    warn!(batch = i + 1, chunks = batch.len(), error = %e, "batch failed, skipping");
                    report.failed_batches += 1;
                    report.failed_chunks += batch.len();
                    self.progress.report(IndexProgressEvent::BatchFailed {
                        batch: i as u64 + 1,
                        chunks: batch.len() as u64,
                    });
                }
            }
        }
    }

    async fn write_batch(&self, batch: &[(String, DocumentChunk)]) -> Result<(), IndexError> {
        let texts: Vec<String> = batch.iter().map(|(_, c)| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(IndexError::EmbeddingMismatch {
                sent: texts.len(),
                received: vectors.len(),
            });
        }

        // The first successful batch fixes the collection's model and dimension.
        if let Some(first) = vectors.first() {
            self.collection
                .ensure_collection(first.len(), self.embedder.model_name())
                .await?;
        }

        let entries: Vec<IndexEntry> = batch
            .iter()
            .zip(vectors)
            .map(|((id, chunk), embedding)| IndexEntry {
                id: id.clone(),
                chunk: chunk.clone(),
                embedding,
            })
            .collect();
        self.collection.upsert(&entries).await?;
        Ok(())
    }
}

/// Pair chunks with their identity, keeping the first of any duplicates.
fn dedup(chunks: &[DocumentChunk]) -> Vec<(String, DocumentChunk)> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter_map(|chunk| {
            let id = chunk.identity();
            seen.insert(id.clone()).then(|| (id, chunk.clone()))
        })
        .collect()
}

fn into_chunks(entries: Vec<ScoredEntry>) -> Vec<DocumentChunk> {
    entries.into_iter().map(|e| e.chunk).collect()
}

fn log_report(report: &IndexReport) {
    info!(
        candidates = report.candidates,
        already_indexed = report.already_indexed,
        indexed = report.indexed,
        failed_batches = report.failed_batches,
        failed_chunks = report.failed_chunks,
        "indexing complete"
    );
}

/// Remove temporary index directories under `tmp_root`, sparing `keep` and
/// any directory whose lock is held by a live manager.
pub fn cleanup_stale_temp_dirs_in(tmp_root: &Path, keep: Option<&Path>) -> usize {
    let entries = match std::fs::read_dir(tmp_root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %tmp_root.display(), error = %e, "cannot scan temp dir");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_ours = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(TEMP_DIR_PREFIX));
        if !is_ours || !path.is_dir() || keep == Some(path.as_path()) {
            continue;
        }

        // No marker means the owner died before locking it.
        let claim = match OpenOptions::new().write(true).open(path.join(LOCK_FILE)) {
            Ok(file) => match file.try_lock_exclusive() {
                Ok(()) => Some(file),
                Err(_) => {
                    debug!(path = %path.display(), "temporary index in use, skipping");
                    continue;
                }
            },
            Err(_) => None,
        };

        let result = std::fs::remove_dir_all(&path);
        drop(claim);
        match result {
            Ok(()) => {
                removed += 1;
                info!(path = %path.display(), "removed stale temporary index");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale index"),
        }
    }
    removed
}
