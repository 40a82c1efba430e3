//! Chunk data model.
//!
//! A [`DocumentChunk`] is the unit the pipeline moves around: the loader
//! creates it, the index manager stores it under its content identity, and
//! the router hands its text to the LLM. Chunks are immutable once built; a
//! changed source file yields new chunks with new identities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Category of a knowledge-base document, read from its `## Type` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    /// Language rules and constraints.
    Ruleset,
    /// Function signatures and API reference.
    Functions,
    /// Worked code examples.
    Example,
}

impl DocType {
    pub const ALL: [DocType; 3] = [DocType::Ruleset, DocType::Functions, DocType::Example];

    /// Parse a marker value case-insensitively. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ruleset" => Some(DocType::Ruleset),
            "functions" => Some(DocType::Functions),
            "example" => Some(DocType::Example),
            _ => None,
        }
    }

    /// Canonical stored form, e.g. `"RULESET"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Ruleset => "RULESET",
            DocType::Functions => "FUNCTIONS",
            DocType::Example => "EXAMPLE",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the source file, relative to the knowledge-base root.
    pub source: String,
    pub doc_type: DocType,
    pub title: String,
    /// Whether the chunk contains a fenced code block.
    pub has_code: bool,
    /// Position among the accepted chunks of the source file, from 0.
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Length of `content` in characters.
    pub content_length: usize,
}

/// A validated piece of a knowledge-base document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    /// Content-addressed identity used as the index primary key.
    pub fn identity(&self) -> String {
        chunk_identity(&self.metadata.source, &self.content)
    }
}

/// Hex SHA-256 over `source`, a NUL separator, and `content`.
///
/// Identical `(source, content)` pairs always map to the same key, so
/// re-indexing an unchanged corpus never creates duplicate entries.
pub fn chunk_identity(source: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
