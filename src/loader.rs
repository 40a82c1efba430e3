//! Document classification and loading.
//!
//! Each markdown file declares its kind with a `## Type` marker followed by
//! a value line (`RULESET`, `FUNCTIONS` or `EXAMPLE`) and its title with the
//! first `# Heading`. The loader picks a chunk window per document type,
//! splits the file, drops chunks outside the size bounds, and numbers the
//! survivors. A file that fails is retried with exponential backoff and then
//! recorded as failed; the run carries on with the remaining files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use scriptdocs_core::chunk::{char_len, has_code, BoundsViolation, Chunker};
use scriptdocs_core::models::{ChunkMetadata, DocType, DocumentChunk};

use crate::config::{ChunkingConfig, Config, KnowledgeBaseConfig, LoaderConfig};
use crate::error::{IngestionError, ProcessingError};
use crate::scan::{scan_knowledge_base, ScannedFile};

static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^##[ \t]*Type[ \t]*\r?\n[ \t]*([^\r\n]*)").expect("valid type regex")
});

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+([^\r\n]+)").expect("valid title regex"));

pub const DEFAULT_TITLE: &str = "Untitled Document";

/// Counters for the most recent [`DocumentLoader::load_documents`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total_files: usize,
    pub successful_files: usize,
    pub failed_files: usize,
    pub total_chunks: usize,
    /// Extra attempts spent on files that failed at least once.
    pub retry_count: usize,
    pub rejected_chunks: usize,
    /// Rejection counts keyed by reason (`too_short`, `too_long`).
    pub rejection_reasons: BTreeMap<String, usize>,
    /// Chunks produced by the oversized force-split path.
    pub forced_chunks: usize,
    pub failed: Vec<FailedFile>,
}

/// A file that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub source: String,
    /// One entry per attempt, oldest first.
    pub errors: Vec<String>,
}

/// Result of one successful pass over a file.
#[derive(Debug, Default)]
struct FileOutcome {
    chunks: Vec<DocumentChunk>,
    rejections: Vec<BoundsViolation>,
    forced: usize,
}

/// All attempts at a file failed.
struct FileFailure {
    errors: Vec<String>,
    rejections: Vec<BoundsViolation>,
}

pub struct DocumentLoader {
    knowledge_base: KnowledgeBaseConfig,
    chunking: ChunkingConfig,
    retry: LoaderConfig,
    stats: RwLock<ProcessingStats>,
}

impl DocumentLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            knowledge_base: config.knowledge_base.clone(),
            chunking: config.chunking.clone(),
            retry: config.loader.clone(),
            stats: RwLock::new(ProcessingStats::default()),
        }
    }

    /// Root directory of the corpus.
    pub fn root(&self) -> &Path {
        &self.knowledge_base.path
    }

    /// Load and chunk every document in the knowledge base.
    ///
    /// Fails only when the directory cannot be scanned or no chunk at all
    /// survives; individual file failures are recorded in the stats.
    pub async fn load_documents(&self) -> Result<Vec<DocumentChunk>, IngestionError> {
        *self.stats.write().unwrap() = ProcessingStats::default();
        let files = scan_knowledge_base(&self.knowledge_base).map_err(IngestionError::Scan)?;
        info!(
            root = %self.knowledge_base.path.display(),
            files = files.len(),
            "loading documents"
        );

        let mut stats = ProcessingStats {
            total_files: files.len(),
            ..ProcessingStats::default()
        };
        let mut chunks = Vec::new();

        for file in &files {
            match self.process_file_with_retry(file, &mut stats).await {
                Ok(outcome) => {
                    stats.successful_files += 1;
                    stats.total_chunks += outcome.chunks.len();
                    stats.forced_chunks += outcome.forced;
                    record_rejections(&mut stats, &outcome.rejections);
                    chunks.extend(outcome.chunks);
                }
                Err(failure) => {
                    stats.failed_files += 1;
                    record_rejections(&mut stats, &failure.rejections);
                    warn!(
                        source = %file.source,
                        attempts = failure.errors.len(),
                        last_error = failure.errors.last().map(String::as_str).unwrap_or(""),
                        "file failed after all attempts"
                    );
                    stats.failed.push(FailedFile {
                        source: file.source.clone(),
                        errors: failure.errors,
                    });
                }
            }
        }

        log_summary(&stats);
        let (total_files, failed_files) = (stats.total_files, stats.failed_files);
        *self.stats.write().unwrap() = stats;

        if chunks.is_empty() {
            return Err(IngestionError::Empty {
                total_files,
                failed_files,
            });
        }
        Ok(chunks)
    }

    /// Stats from the most recent run. Empty if that run could not scan the
    /// knowledge base.
    pub fn get_processing_stats(&self) -> ProcessingStats {
        self.stats.read().unwrap().clone()
    }

    async fn process_file_with_retry(
        &self,
        file: &ScannedFile,
        stats: &mut ProcessingStats,
    ) -> Result<FileOutcome, FileFailure> {
        let mut errors = Vec::new();
        let mut rejections = Vec::new();
        let mut delay = Duration::from_millis(self.retry.retry_delay_ms);

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                debug!(source = %file.source, attempt, ?delay, "retrying file");
                tokio::time::sleep(delay).await;
                delay *= 2;
                stats.retry_count += 1;
            }

            match self.process_file(&file.path, &file.source) {
                Ok(outcome) if !outcome.chunks.is_empty() => return Ok(outcome),
                Ok(outcome) => {
                    let err = ProcessingError::NoValidChunks {
                        source_path: file.source.clone(),
                        rejected: outcome.rejections.len(),
                    };
                    warn!(source = %file.source, attempt, error = %err, "file processing failed");
                    errors.push(err.to_string());
                    rejections = outcome.rejections;
                }
                Err(err) => {
                    warn!(source = %file.source, attempt, error = %err, "file processing failed");
                    errors.push(err.to_string());
                }
            }
        }

        Err(FileFailure { errors, rejections })
    }

    fn process_file(&self, path: &Path, source: &str) -> Result<FileOutcome, ProcessingError> {
        let bytes = std::fs::read(path).map_err(|cause| ProcessingError::Read {
            source_path: source.to_string(),
            cause,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| ProcessingError::InvalidUtf8 {
            source_path: source.to_string(),
        })?;

        let doc_type = extract_doc_type(&text).unwrap_or_else(|| {
            warn!(source, "missing or unknown document type, defaulting to FUNCTIONS");
            DocType::Functions
        });
        let title = extract_title(&text);

        let chunker = Chunker::new(self.chunking.chunker_for(doc_type));
        let bounds = chunker.config().bounds;

        let mut outcome = FileOutcome::default();
        let mut accepted = Vec::new();
        for piece in chunker.split(&text) {
            if piece.text.trim().is_empty() {
                continue;
            }
            if let Some(violation) = bounds.violation(&piece.text) {
                // Forced pieces are cut at the maximum; only a short tail can miss.
                debug!(source, %violation, forced = piece.forced, "chunk rejected");
                outcome.rejections.push(violation);
                continue;
            }
            if piece.forced {
                outcome.forced += 1;
            }
            accepted.push(piece.text);
        }

        let total_chunks = accepted.len();
        outcome.chunks = accepted
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| DocumentChunk {
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    doc_type,
                    title: title.clone(),
                    has_code: has_code(&content),
                    chunk_index,
                    total_chunks,
                    content_length: char_len(&content),
                },
                content,
            })
            .collect();

        debug!(
            source,
            %doc_type,
            chunks = outcome.chunks.len(),
            rejected = outcome.rejections.len(),
            "file chunked"
        );
        Ok(outcome)
    }
}

/// The value under the `## Type` marker, if it names a known type.
pub fn extract_doc_type(text: &str) -> Option<DocType> {
    TYPE_RE
        .captures(text)
        .and_then(|caps| DocType::parse(caps[1].trim()))
}

/// The first `# Heading`, or [`DEFAULT_TITLE`].
pub fn extract_title(text: &str) -> String {
    TITLE_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

fn record_rejections(stats: &mut ProcessingStats, rejections: &[BoundsViolation]) {
    stats.rejected_chunks += rejections.len();
    for violation in rejections {
        *stats
            .rejection_reasons
            .entry(violation.reason().to_string())
            .or_insert(0) += 1;
    }
}

fn log_summary(stats: &ProcessingStats) {
    info!(
        total_files = stats.total_files,
        successful_files = stats.successful_files,
        failed_files = stats.failed_files,
        total_chunks = stats.total_chunks,
        retries = stats.retry_count,
        rejected_chunks = stats.rejected_chunks,
        forced_chunks = stats.forced_chunks,
        "document loading complete"
    );
    for (reason, count) in &stats.rejection_reasons {
        info!(reason = reason.as_str(), count, "chunks rejected");
    }
    for failed in &stats.failed {
        warn!(source = %failed.source, errors = ?failed.errors, "failed file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::TempDir;

    fn loader_for(root: &Path) -> DocumentLoader {
        loader_with_retries(root, 1, 1)
    }

    fn loader_with_retries(root: &Path, max_retries: u32, retry_delay_ms: u64) -> DocumentLoader {
        let text = format!(
            "[knowledge_base]\npath = {:?}\n[loader]\nmax_retries = {}\nretry_delay_ms = {}\n[memory]\nmax_turns = 3\n",
            root.display().to_string(),
            max_retries,
            retry_delay_ms
        );
        DocumentLoader::new(&parse_config(&text).unwrap())
    }

    fn prose(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_extract_doc_type() {
        assert_eq!(
            extract_doc_type("# T\n\n## Type\nRULESET\n"),
            Some(DocType::Ruleset)
        );
        assert_eq!(
            extract_doc_type("## type\n  example  \nbody"),
            Some(DocType::Example)
        );
        assert_eq!(extract_doc_type("## Type\nTUTORIAL\n"), None);
        assert_eq!(extract_doc_type("no marker here"), None);
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title("# Player Movement\n## Type\nEXAMPLE"), "Player Movement");
        assert_eq!(extract_title("## Only a subheading\n"), DEFAULT_TITLE);
        assert_eq!(extract_title(""), DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_load_assigns_metadata() {
        let tmp = TempDir::new().unwrap();
        let body = format!("# Rules\n\n## Type\nRULESET\n\n{}\n", prose(60));
        std::fs::write(tmp.path().join("rules.md"), body).unwrap();

        let loader = loader_for(tmp.path());
        let chunks = loader.load_documents().await.unwrap();
        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.source, "rules.md");
            assert_eq!(chunk.metadata.doc_type, DocType::Ruleset);
            assert_eq!(chunk.metadata.title, "Rules");
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.total_chunks, chunks.len());
            assert_eq!(chunk.metadata.content_length, chunk.content.chars().count());
        }

        let stats = loader.get_processing_stats();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.successful_files, 1);
        assert_eq!(stats.total_chunks, chunks.len());
    }

    #[tokio::test]
    async fn test_unknown_type_defaults_to_functions() {
        let tmp = TempDir::new().unwrap();
        let body = format!("# Misc\n\n## Type\nTUTORIAL\n\n{}\n", prose(40));
        std::fs::write(tmp.path().join("misc.md"), body).unwrap();

        let chunks = loader_for(tmp.path()).load_documents().await.unwrap();
        assert!(chunks
            .iter()
            .all(|c| c.metadata.doc_type == DocType::Functions));
    }

    #[tokio::test]
    async fn test_bad_file_recorded_and_run_continues() {
        let tmp = TempDir::new().unwrap();
        let good = format!("# Good\n\n## Type\nEXAMPLE\n\n{}\n", prose(40));
        std::fs::write(tmp.path().join("good.md"), good).unwrap();
        std::fs::write(tmp.path().join("bad.md"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let loader = loader_for(tmp.path());
        let chunks = loader.load_documents().await.unwrap();
        assert!(chunks.iter().all(|c| c.metadata.source == "good.md"));

        let stats = loader.get_processing_stats();
        assert_eq!(stats.failed_files, 1);
        assert_eq!(stats.failed[0].source, "bad.md");
        // One initial attempt plus one retry.
        assert_eq!(stats.failed[0].errors.len(), 2);
        assert!(stats.failed[0].errors[0].contains("UTF-8"));
        assert_eq!(stats.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_doubles() {
        let tmp = TempDir::new().unwrap();
        let good = format!("# Good\n\n## Type\nEXAMPLE\n\n{}\n", prose(40));
        std::fs::write(tmp.path().join("good.md"), good).unwrap();
        std::fs::write(tmp.path().join("bad.md"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let loader = loader_with_retries(tmp.path(), 2, 100);
        let start = tokio::time::Instant::now();
        loader.load_documents().await.unwrap();
        let elapsed = start.elapsed();

        // 100ms before the first retry, 200ms before the second.
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));

        let stats = loader.get_processing_stats();
        assert_eq!(stats.failed_files, 1);
        assert_eq!(stats.failed[0].errors.len(), 3);
        assert_eq!(stats.retry_count, 2);
    }

    #[tokio::test]
    async fn test_failed_scan_clears_previous_stats() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("docs");
        std::fs::create_dir_all(&root).unwrap();
        let body = format!("# Rules\n\n## Type\nRULESET\n\n{}\n", prose(60));
        std::fs::write(root.join("rules.md"), body).unwrap();

        let loader = loader_for(&root);
        loader.load_documents().await.unwrap();
        assert_eq!(loader.get_processing_stats().successful_files, 1);

        std::fs::remove_dir_all(&root).unwrap();
        let err = loader.load_documents().await.unwrap_err();
        assert!(matches!(err, IngestionError::Scan(_)));
        assert_eq!(loader.get_processing_stats(), ProcessingStats::default());
    }

    #[tokio::test]
    async fn test_short_file_rejected_with_reason() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("tiny.md"), "# Tiny\n\nshort").unwrap();
        let good = format!("# Good\n\n## Type\nRULESET\n\n{}\n", prose(40));
        std::fs::write(tmp.path().join("good.md"), good).unwrap();

        let loader = loader_for(tmp.path());
        loader.load_documents().await.unwrap();
        let stats = loader.get_processing_stats();
        assert_eq!(stats.failed_files, 1);
        assert_eq!(stats.rejection_reasons.get("too_short"), Some(&1));
        assert!(stats.failed[0].errors[0].contains("no valid chunks"));
    }

    #[tokio::test]
    async fn test_empty_corpus_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = loader_for(tmp.path()).load_documents().await.unwrap_err();
        assert!(matches!(err, IngestionError::Empty { total_files: 0, .. }));
    }
}
