//! Application wiring.
//!
//! [`App::bootstrap`] builds the embedding provider, the document loader,
//! the vector index manager and the LLM provider once, brings the index up
//! to date, and then hands out [`QueryRouter`]s. Nothing is global: callers
//! own the `App` and pass it where it is needed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use scriptdocs_core::embedding::EmbeddingProvider;
use scriptdocs_core::llm::LlmProvider;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::index::{IndexReport, VectorIndexManager};
use crate::llm::create_llm;
use crate::loader::DocumentLoader;
use crate::progress::{IndexProgressReporter, NoProgress};
use crate::router::QueryRouter;

/// Everything `App` needs from the outside world.
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub progress: Box<dyn IndexProgressReporter>,
}

impl Providers {
    /// Providers named in `config`, with no progress output.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            embedder: create_provider(&config.embedding)
                .context("failed to create embedding provider")?,
            llm: create_llm(&config.llm).context("failed to create LLM provider")?,
            progress: Box::new(NoProgress),
        })
    }
}

pub struct App {
    config: Config,
    loader: DocumentLoader,
    index: Arc<VectorIndexManager>,
    llm: Arc<dyn LlmProvider>,
    report: IndexReport,
}

impl App {
    /// Build the app from config and bring the index up to date.
    pub async fn bootstrap(config: Config, force_recreate: bool) -> Result<Self> {
        let providers = Providers::from_config(&config)?;
        Self::bootstrap_with(config, force_recreate, providers).await
    }

    pub async fn bootstrap_with(
        config: Config,
        force_recreate: bool,
        providers: Providers,
    ) -> Result<Self> {
        let index = VectorIndexManager::open(&config, providers.embedder)
            .await
            .context("failed to open vector index")?
            .with_progress(providers.progress);
        let removed = index.cleanup_stale_temp_dirs();
        if removed > 0 {
            info!(removed, "cleaned up stale temporary indexes");
        }

        let loader = DocumentLoader::new(&config);
        let report = index
            .get_or_create_vector_store(&loader, force_recreate)
            .await
            .context("failed to build vector index")?;
        if report.indexed == 0 && report.already_indexed == 0 {
            warn!("index is empty; answers will have no documentation context");
        }

        Ok(Self {
            config,
            loader,
            index: Arc::new(index),
            llm: providers.llm,
            report,
        })
    }

    /// Assemble an app from already-built parts without touching the index.
    pub fn from_parts(
        config: Config,
        index: Arc<VectorIndexManager>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        let loader = DocumentLoader::new(&config);
        Self {
            config,
            loader,
            index,
            llm,
            report: IndexReport::default(),
        }
    }

    /// A fresh conversation session sharing this app's index and LLM.
    pub fn router(&self) -> QueryRouter {
        QueryRouter::new(
            Arc::clone(&self.index),
            Arc::clone(&self.llm),
            Duration::from_secs(self.config.llm.timeout_secs),
            self.config.memory.max_turns,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loader(&self) -> &DocumentLoader {
        &self.loader
    }

    pub fn index(&self) -> &Arc<VectorIndexManager> {
        &self.index
    }

    /// Result of the indexing pass run at bootstrap.
    pub fn report(&self) -> &IndexReport {
        &self.report
    }

    pub async fn shutdown(&self) {
        self.index.shutdown().await;
        info!("shutdown complete");
    }
}
