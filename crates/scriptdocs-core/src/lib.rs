//! # scriptdocs core
//!
//! Runtime-free logic shared by the scriptdocs pipeline: the chunk data
//! model, structure-aware chunking, the vector collection abstraction,
//! diversity re-ranking, and the embedding/LLM capability traits.
//!
//! This crate does no filesystem or network I/O. Concrete collections
//! (SQLite) and HTTP providers live in the `scriptdocs` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
#[cfg(feature = "mock")]
pub mod mock;
pub mod models;
pub mod search;
pub mod store;
