//! # Script Docs CLI (`sdocs`)
//!
//! Builds the documentation index and answers questions against it.
//!
//! ## Usage
//!
//! ```bash
//! sdocs --config ./config/sdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sdocs ingest` | Load the corpus and bring the index up to date |
//! | `sdocs ask "<question>"` | Answer one question |
//! | `sdocs chat` | Interactive session with conversation memory |
//! | `sdocs stats` | Show what is indexed |
//! | `sdocs prune` | Delete index entries no longer produced by the corpus |
//! | `sdocs check` | Send one request to each provider and report failures |
//!
//! `--force-recreate` (or `SCRIPTDOCS_FORCE_RECREATE=1`) rebuilds the index
//! from scratch instead of indexing incrementally.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use scriptdocs::app::{App, Providers};
use scriptdocs::config::{self, Config};
use scriptdocs::embedding::DisabledProvider;
use scriptdocs::health;
use scriptdocs::index::VectorIndexManager;
use scriptdocs::loader::DocumentLoader;
use scriptdocs::progress::ProgressMode;
use scriptdocs::router::{QueryOutcome, QueryResponse};
use scriptdocs::stats;

/// Script Docs: retrieval-augmented answers over game-scripting documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sdocs.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "sdocs", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sdocs.toml")]
    config: PathBuf,

    /// Rebuild the index from scratch instead of indexing incrementally.
    #[arg(long, global = true, env = "SCRIPTDOCS_FORCE_RECREATE")]
    force_recreate: bool,

    /// Indexing progress on stderr. Defaults to `human` on a terminal, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the knowledge base and update the index.
    Ingest {
        /// Print the loader and index reports as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask questions interactively. `/clear` resets memory, `/exit` quits.
    Chat,

    /// Show index statistics.
    Stats,

    /// Delete index entries whose chunks no longer exist in the corpus.
    Prune,

    /// Send one request to the embedding provider and the LLM.
    Check {
        /// Print the results as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Ingest { json } => {
            let app = bootstrap(cfg, cli.force_recreate, progress).await?;
            let stats = app.loader().get_processing_stats();
            if json {
                let out = serde_json::json!({
                    "loader": stats,
                    "index": app.report(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                let report = app.report();
                println!(
                    "Loaded {} files ({} failed), {} chunks.",
                    stats.total_files, stats.failed_files, stats.total_chunks
                );
                println!(
                    "Indexed {} new chunks ({} already indexed, {} failed).",
                    report.indexed, report.already_indexed, report.failed_chunks
                );
                for failed in &stats.failed {
                    println!(
                        "  failed: {} ({})",
                        failed.source,
                        failed.errors.last().map(String::as_str).unwrap_or("")
                    );
                }
            }
            app.shutdown().await;
        }
        Commands::Ask { question, json } => {
            let app = bootstrap(cfg, cli.force_recreate, progress).await?;
            let response = app.router().process_query(Some(question.as_str())).await;
            print_response(&response, json)?;
            app.shutdown().await;
        }
        Commands::Chat => {
            let app = bootstrap(cfg, cli.force_recreate, progress).await?;
            run_chat(&app).await?;
            app.shutdown().await;
        }
        Commands::Stats => {
            let index = open_index_only(&cfg).await?;
            stats::run_stats(&index).await?;
            index.shutdown().await;
        }
        Commands::Prune => {
            let index = open_index_only(&cfg).await?;
            let chunks = DocumentLoader::new(&cfg).load_documents().await?;
            let removed = index.prune_stale(&chunks).await?;
            println!("Pruned {} stale entries.", removed);
            index.shutdown().await;
        }
        Commands::Check { json } => {
            let providers = Providers::from_config(&cfg)?;
            let checks =
                health::check_providers(providers.embedder.as_ref(), providers.llm.as_ref()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                health::print_checks(&checks);
            }
            let failed = checks.iter().filter(|c| !c.ok).count();
            if failed > 0 {
                bail!("{} of {} provider checks failed", failed, checks.len());
            }
        }
    }

    Ok(())
}

async fn bootstrap(cfg: Config, force_recreate: bool, progress: ProgressMode) -> Result<App> {
    let mut providers = Providers::from_config(&cfg)?;
    providers.progress = progress.reporter();
    App::bootstrap_with(cfg, force_recreate, providers).await
}

/// Open the index without embedding anything.
async fn open_index_only(cfg: &Config) -> Result<VectorIndexManager> {
    VectorIndexManager::open(cfg, Arc::new(DisabledProvider)).await
}

async fn run_chat(app: &App) -> Result<()> {
    let router = app.router();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "/exit" | "/quit" => break,
            "/clear" => {
                router.clear_history();
                println!("(history cleared)");
            }
            "" => continue,
            question => {
                let response = router.process_query(Some(question)).await;
                print_response(&response, false)?;
            }
        }
    }
    Ok(())
}

fn print_response(response: &QueryResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}", response.answer);
    if response.outcome == QueryOutcome::Answered && !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &response.sources {
            println!("  - {}", source);
        }
    }
    println!();
    Ok(())
}
