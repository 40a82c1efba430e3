//! TOML configuration.
//!
//! Every section except `[knowledge_base]` and `[memory]` has defaults, so a
//! minimal config only names the corpus directory and the conversation
//! window. [`load_config`] parses the file and validates cross-field
//! constraints before anything else runs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use scriptdocs_core::chunk::{ChunkerConfig, SizeBounds};
use scriptdocs_core::models::DocType;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_ruleset_window")]
    pub ruleset: WindowConfig,
    #[serde(default = "default_code_window")]
    pub code: WindowConfig,
    #[serde(default)]
    pub bounds: BoundsConfig,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            ruleset: default_ruleset_window(),
            code: default_code_window(),
            bounds: BoundsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct WindowConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

fn default_ruleset_window() -> WindowConfig {
    WindowConfig {
        chunk_size: 2000,
        chunk_overlap: 400,
    }
}

fn default_code_window() -> WindowConfig {
    WindowConfig {
        chunk_size: 2500,
        chunk_overlap: 250,
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BoundsConfig {
    #[serde(default = "default_min_text")]
    pub min_text: usize,
    #[serde(default = "default_max_text")]
    pub max_text: usize,
    #[serde(default = "default_min_code")]
    pub min_code: usize,
    #[serde(default = "default_max_code")]
    pub max_code: usize,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            min_text: default_min_text(),
            max_text: default_max_text(),
            min_code: default_min_code(),
            max_code: default_max_code(),
        }
    }
}

fn default_min_text() -> usize {
    100
}
fn default_max_text() -> usize {
    3000
}
fn default_min_code() -> usize {
    50
}
fn default_max_code() -> usize {
    6000
}

impl BoundsConfig {
    pub fn size_bounds(&self) -> SizeBounds {
        SizeBounds {
            min_text: self.min_text,
            max_text: self.max_text,
            min_code: self.min_code,
            max_code: self.max_code,
        }
    }
}

impl ChunkingConfig {
    /// Rulesets use the smaller prose window; functions and examples the code window.
    pub fn window_for(&self, doc_type: DocType) -> WindowConfig {
        match doc_type {
            DocType::Ruleset => self.ruleset,
            DocType::Functions | DocType::Example => self.code,
        }
    }

    pub fn chunker_for(&self, doc_type: DocType) -> ChunkerConfig {
        let window = self.window_for(doc_type);
        ChunkerConfig::new(window.chunk_size, window.chunk_overlap)
            .with_bounds(self.bounds.size_bounds())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_loader_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: default_loader_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_loader_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Persist the index on disk under `cache_dir`; otherwise use a temp dir.
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enable_cache: default_enable_cache(),
            cache_dir: default_cache_dir(),
            collection: default_collection(),
            batch_size: default_index_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_enable_cache() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}
fn default_collection() -> String {
    "game_development_docs".to_string()
}
fn default_index_batch_size() -> usize {
    8
}
fn default_batch_delay_ms() -> u64 {
    2000
}

/// How single-phase retrieval ranks candidates.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Similarity,
    Mmr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_mode")]
    pub mode: RetrievalMode,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_fetch_k_multiplier")]
    pub fetch_k_multiplier: usize,
    /// MMR relevance weight: 1.0 is plain similarity, lower is more diverse.
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_rules_k")]
    pub rules_k: usize,
    #[serde(default = "default_functions_k")]
    pub functions_k: usize,
    #[serde(default = "default_examples_k")]
    pub examples_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            top_k: default_top_k(),
            fetch_k_multiplier: default_fetch_k_multiplier(),
            mmr_lambda: default_mmr_lambda(),
            rules_k: default_rules_k(),
            functions_k: default_functions_k(),
            examples_k: default_examples_k(),
        }
    }
}

fn default_mode() -> RetrievalMode {
    RetrievalMode::Mmr
}
fn default_top_k() -> usize {
    8
}
fn default_fetch_k_multiplier() -> usize {
    2
}
fn default_mmr_lambda() -> f32 {
    0.3
}
fn default_rules_k() -> usize {
    2
}
fn default_functions_k() -> usize {
    3
}
fn default_examples_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Hard budget for one answer, retrieval excluded.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Conversation window. No default: the operator picks how much history to keep.
#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub max_turns: usize,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    let bounds = &config.chunking.bounds;
    for (name, window) in [
        ("ruleset", config.chunking.ruleset),
        ("code", config.chunking.code),
    ] {
        if window.chunk_size == 0 {
            anyhow::bail!("chunking.{}.chunk_size must be > 0", name);
        }
        if window.chunk_overlap >= window.chunk_size {
            anyhow::bail!(
                "chunking.{}.chunk_overlap must be < chunk_size ({} >= {})",
                name,
                window.chunk_overlap,
                window.chunk_size
            );
        }
        if window.chunk_size + window.chunk_overlap > bounds.max_text {
            anyhow::bail!(
                "chunking.{}: chunk_size + chunk_overlap must be <= chunking.bounds.max_text ({})",
                name,
                bounds.max_text
            );
        }
    }
    if config.chunking.ruleset.chunk_size > config.chunking.code.chunk_size {
        anyhow::bail!("chunking.ruleset.chunk_size must be <= chunking.code.chunk_size");
    }
    if bounds.min_text >= bounds.max_text {
        anyhow::bail!("chunking.bounds.min_text must be < max_text");
    }
    if bounds.min_code >= bounds.max_code {
        anyhow::bail!("chunking.bounds.min_code must be < max_code");
    }

    // Validate index
    if config.index.batch_size == 0 {
        anyhow::bail!("index.batch_size must be >= 1");
    }
    if config.index.collection.trim().is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }

    // Validate retrieval
    let retrieval = &config.retrieval;
    if retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if retrieval.fetch_k_multiplier < 1 {
        anyhow::bail!("retrieval.fetch_k_multiplier must be >= 1");
    }
    if !(0.0..=1.0).contains(&retrieval.mmr_lambda) {
        anyhow::bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "anthropic" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, anthropic, or ollama.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    // Validate memory
    if config.memory.max_turns == 0 {
        anyhow::bail!("memory.max_turns must be >= 1");
    }

    Ok(())
}
