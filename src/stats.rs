//! Index statistics.
//!
//! A quick summary of what is indexed: total entries, per-document-type
//! counts and the on-disk size. Used by `sdocs stats` to confirm that
//! ingestion produced what was expected.

use anyhow::Result;

use crate::index::{VectorIndexManager, INDEX_FILE};

/// Print a summary of the index to stdout.
pub async fn run_stats(index: &VectorIndexManager) -> Result<()> {
    let stats = index.collection_stats().await?;
    let location = index.storage_path();
    let db_size = location
        .as_ref()
        .and_then(|dir| std::fs::metadata(dir.join(INDEX_FILE)).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Script Docs - Index Stats");
    println!("=========================");
    println!();
    match &location {
        Some(dir) => println!("  Index:       {}", dir.join(INDEX_FILE).display()),
        None => println!("  Index:       (external)"),
    }
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", stats.collection);
    println!("  Entries:     {}", stats.total);

    if stats.total > 0 {
        println!();
        println!("  By document type:");
        println!("  {:<12} {:>8} {:>7}", "TYPE", "CHUNKS", "SHARE");
        println!("  {}", "-".repeat(29));
        for (doc_type, count) in &stats.by_doc_type {
            println!(
                "  {:<12} {:>8} {:>6}%",
                doc_type.as_str(),
                count,
                (count * 100) / stats.total
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
