//! Indexing progress reporting.
//!
//! Emitted on **stderr** so stdout stays parseable for scripts. The index
//! manager reports once per embedding batch.

use std::io::{IsTerminal, Write};

/// A single progress event while indexing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Chunks already in the store were skipped; `pending` remain.
    Planned { skipped: u64, pending: u64 },
    /// `n` of `total` pending chunks have been embedded and stored.
    Embedded { n: u64, total: u64 },
    /// Batch `batch` (1-based) failed and its chunks were skipped.
    BatchFailed { batch: u64, chunks: u64 },
}

/// Reports indexing progress.
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedded  1,200 / 5,000 chunks".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Planned { skipped, pending } => format!(
                "index  {} already indexed, {} to embed\n",
                format_number(*skipped),
                format_number(*pending)
            ),
            IndexProgressEvent::Embedded { n, total } => format!(
                "index  embedded  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::BatchFailed { batch, chunks } => format!(
                "index  batch {} failed, skipped {} chunks\n",
                batch,
                format_number(*chunks)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Planned { skipped, pending } => serde_json::json!({
                "event": "planned",
                "skipped": skipped,
                "pending": pending
            }),
            IndexProgressEvent::Embedded { n, total } => serde_json::json!({
                "event": "embedded",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::BatchFailed { batch, chunks } => serde_json::json!({
                "event": "batch_failed",
                "batch": batch,
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
