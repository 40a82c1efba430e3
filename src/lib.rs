//! # Script Docs
//!
//! Retrieval-augmented question answering over game-scripting documentation.
//!
//! A directory of markdown files (language rules, function references and
//! worked examples) is classified, chunked with code fences kept intact,
//! embedded and stored in a local vector index. Questions are classified by
//! intent, answered from retrieved context by an LLM, and kept in a bounded
//! per-session conversation memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Markdown   │──▶│   Loader     │──▶│ Index manager │──▶ SQLite
//! │  corpus     │   │ classify+cut │   │ embed+upsert  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │ retrieve / MMR
//!                                             ▼
//!                  question ──▶ ┌──────────────────────┐ ──▶ answer
//!                               │ Query router + LLM    │     + sources
//!                               └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sdocs ingest                       # build or update the index
//! sdocs ask "How do I spawn an enemy?"
//! sdocs chat                         # interactive session with memory
//! sdocs stats
//! sdocs check                        # one round trip to each provider
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`scan`] | Knowledge-base directory walk |
//! | [`loader`] | Document classification, chunking and validation |
//! | [`index`] | Vector index manager: incremental indexing and retrieval |
//! | [`sqlite_store`] | SQLite vector collection |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | LLM providers |
//! | [`http`] | Shared JSON-over-HTTP retry loop for providers |
//! | [`health`] | Provider connectivity check |
//! | [`prompts`] | Prompt profiles and context assembly |
//! | [`router`] | Query validation, intent routing and answering |
//! | [`app`] | Explicit wiring of all of the above |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`progress`] | Indexing progress on stderr |
//! | [`stats`] | `sdocs stats` output |
//! | [`error`] | Error types for each pipeline stage |
//!
//! Shared types and traits (chunker, models, provider and store traits)
//! live in the `scriptdocs-core` crate.

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod health;
pub mod http;
pub mod index;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod progress;
pub mod prompts;
pub mod router;
pub mod scan;
pub mod sqlite_store;
pub mod stats;
