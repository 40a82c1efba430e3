//! Knowledge-base directory walk.
//!
//! Finds every file under `knowledge_base.path` that matches the include
//! globs and none of the exclude globs. Paths are matched relative to the
//! root, so `**/*.md` picks up nested docs as well as top-level ones.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::config::KnowledgeBaseConfig;

/// A file selected for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Path relative to the knowledge-base root, `/`-separated.
    pub source: String,
}

/// Walk the knowledge base, returning matching files sorted by `source`.
pub fn scan_knowledge_base(config: &KnowledgeBaseConfig) -> Result<Vec<ScannedFile>> {
    let root = &config.path;
    if !root.is_dir() {
        bail!("Knowledge base path is not a directory: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.cache/**".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let source = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&source) {
            continue;
        }
        if !include_set.is_match(&source) {
            continue;
        }

        files.push(ScannedFile {
            path: path.to_path_buf(),
            source,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.source.cmp(&b.source));

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kb(root: &std::path::Path, exclude: Vec<String>) -> KnowledgeBaseConfig {
        KnowledgeBaseConfig {
            path: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: exclude,
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("guides")).unwrap();
        std::fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("b.md"), "b").unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("guides/c.md"), "c").unwrap();
        std::fs::write(tmp.path().join("drafts/d.md"), "d").unwrap();

        let files = scan_knowledge_base(&kb(tmp.path(), vec!["drafts/**".to_string()])).unwrap();
        let sources: Vec<&str> = files.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(sources, vec!["a.md", "b.md", "guides/c.md"]);
    }

    #[test]
    fn test_missing_root() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(scan_knowledge_base(&kb(&missing, vec![])).is_err());
    }
}
