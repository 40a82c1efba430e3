//! Structure-aware markdown/code chunker.
//!
//! Splits document text into chunks that respect headings, never cut a
//! fenced code block in half, and stay within configurable size bounds.
//! All sizes are counted in Unicode scalar values (`char`s).
//!
//! # Algorithm
//!
//! 1. Replace every fenced code block with an opaque placeholder token. An
//!    unterminated trailing fence runs to end of text and is closed.
//! 2. Split the remaining text into sections at heading lines (`^#+\s+`).
//! 3. Accumulate lines per section up to `chunk_size`. Each new chunk is
//!    seeded with up to `chunk_overlap` characters of the lines preceding
//!    the cut. Lines holding code are never used as overlap, and sizes count
//!    the real code length behind a placeholder. Prose lines longer than
//!    `chunk_size` are hard-split at word boundaries.
//! 4. Restore placeholders to their original fenced content.
//! 5. Merge chunks below their minimum into a neighbour when the result
//!    stays within the maximum.
//! 6. Force-split chunks above the hard maximum at line boundaries,
//!    preferring method and statement boundaries and re-fencing code
//!    pieces so every piece keeps balanced fences. These pieces are
//!    flagged [`SplitChunk::forced`].
//!
//! # Example
//!
//! ```rust
//! use scriptdocs_core::chunk::split_text;
//!
//! let chunks = split_text("# Title\nSome prose.\n\n# Next\nMore prose.", 1000, 0);
//! assert_eq!(chunks.len(), 2);
//! assert!(chunks[1].starts_with("# Next"));
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

/// Markdown code fence delimiter.
pub const FENCE: &str = "```";

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

/// Smallest line budget used when force-splitting, whatever the bound.
const MIN_FORCE_BUDGET: usize = 16;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x{E000}(\d+)\x{E001}").expect("valid placeholder regex"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s+").expect("valid heading regex"));

static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|static|override|virtual|abstract|async|local|export)\s+)*(?:function|func|fn|def|class|struct|interface|enum|void)\b",
    )
    .expect("valid signature regex")
});

/// Minimum and maximum chunk lengths, separately for prose and code-bearing chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    pub min_text: usize,
    pub max_text: usize,
    pub min_code: usize,
    pub max_code: usize,
}

impl SizeBounds {
    /// Bounds that never merge and never force-split.
    pub const UNBOUNDED: SizeBounds = SizeBounds {
        min_text: 0,
        max_text: usize::MAX,
        min_code: 0,
        max_code: usize::MAX,
    };

    /// `(min, max)` for a chunk with or without code.
    pub fn for_chunk(&self, has_code: bool) -> (usize, usize) {
        if has_code {
            (self.min_code, self.max_code)
        } else {
            (self.min_text, self.max_text)
        }
    }

    /// `(min, max)` for the given chunk text.
    pub fn for_text(&self, text: &str) -> (usize, usize) {
        self.for_chunk(has_code(text))
    }

    /// Returns the violated bound, if any.
    pub fn violation(&self, text: &str) -> Option<BoundsViolation> {
        let (min, max) = self.for_text(text);
        let len = char_len(text);
        if len < min {
            Some(BoundsViolation::TooShort { len, min })
        } else if len > max {
            Some(BoundsViolation::TooLong { len, max })
        } else {
            None
        }
    }

    fn fits_max(&self, text: &str) -> bool {
        char_len(text) <= self.for_text(text).1
    }

    fn below_min(&self, text: &str) -> bool {
        char_len(text) < self.for_text(text).0
    }
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            min_text: 100,
            max_text: 3000,
            min_code: 50,
            max_code: 6000,
        }
    }
}

/// A chunk outside its size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsViolation {
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
}

impl BoundsViolation {
    /// Short machine-friendly reason, used as a statistics key.
    pub fn reason(&self) -> &'static str {
        match self {
            BoundsViolation::TooShort { .. } => "too_short",
            BoundsViolation::TooLong { .. } => "too_long",
        }
    }
}

impl fmt::Display for BoundsViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsViolation::TooShort { len, min } => {
                write!(f, "chunk too short: {} < {} chars", len, min)
            }
            BoundsViolation::TooLong { len, max } => {
                write!(f, "chunk too long: {} > {} chars", len, max)
            }
        }
    }
}

/// Window and bounds for one [`Chunker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub bounds: SizeBounds,
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            bounds: SizeBounds::UNBOUNDED,
        }
    }

    pub fn with_bounds(mut self, bounds: SizeBounds) -> Self {
        self.bounds = bounds;
        self
    }
}

/// One chunk of split output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitChunk {
    pub text: String,
    /// Produced by the oversized force-split path.
    pub forced: bool,
}

/// Splits text into structure-respecting chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks. Empty or whitespace-only input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<SplitChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let protected = Protected::new(text);
        let mut raw = Vec::new();
        for section in sections(&protected.text) {
            self.pack_section(&section, &protected, &mut raw);
        }

        let restored: Vec<String> = raw
            .iter()
            .map(|chunk| protected.restore(chunk).trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect();

        let mut out = Vec::with_capacity(restored.len());
        for chunk in self.merge_small(restored) {
            let (_, max) = self.config.bounds.for_text(&chunk);
            let len = char_len(&chunk);
            if len <= max {
                out.push(SplitChunk {
                    text: chunk,
                    forced: false,
                });
                continue;
            }
            let pieces = force_split(&chunk, max);
            warn!(
                length = len,
                max,
                pieces = pieces.len(),
                has_code = has_code(&chunk),
                "oversized chunk force-split"
            );
            out.extend(
                pieces
                    .into_iter()
                    .map(|text| SplitChunk { text, forced: true }),
            );
        }
        out
    }

    fn pack_section<'a>(&self, section: &[&'a str], protected: &Protected, out: &mut Vec<String>) {
        let size = self.config.chunk_size.max(1);
        let mut current: Vec<&'a str> = Vec::new();
        let mut current_len = 0usize;

        for (i, &line) in section.iter().enumerate() {
            let line_len = protected.line_len(line);

            if line_len > size && !has_placeholder(line) {
                flush(&mut current, &mut current_len, out);
                out.extend(hard_split(line, size).into_iter().map(str::to_string));
                continue;
            }

            if !current.is_empty() && current_len + 1 + line_len > size {
                flush(&mut current, &mut current_len, out);
                let budget = size.saturating_sub(line_len + 1);
                let (seed, seed_len) = self.overlap_seed(&section[..i], budget);
                current = seed;
                current_len = seed_len;
            }

            current_len = if current.is_empty() {
                line_len
            } else {
                current_len + 1 + line_len
            };
            current.push(line);
        }

        flush(&mut current, &mut current_len, out);
    }

    /// Trailing context for the next chunk, taken from the lines before the cut.
    fn overlap_seed<'a>(&self, preceding: &[&'a str], budget: usize) -> (Vec<&'a str>, usize) {
        let budget = budget.min(self.config.chunk_overlap);
        let mut seed = Vec::new();
        let mut len = 0usize;
        if budget == 0 {
            return (seed, len);
        }

        for &line in preceding.iter().rev() {
            if has_placeholder(line) {
                break;
            }
            let line_len = char_len(line);
            let added = if seed.is_empty() {
                line_len
            } else {
                len + 1 + line_len
            };
            if added > budget {
                if seed.is_empty() {
                    if let Some(tail) = word_tail(line, budget) {
                        len = char_len(tail);
                        seed.push(tail);
                    }
                }
                break;
            }
            seed.push(line);
            len = added;
        }

        seed.reverse();
        (seed, len)
    }

    fn merge_small(&self, chunks: Vec<String>) -> Vec<String> {
        let bounds = &self.config.bounds;
        let mut out: Vec<String> = Vec::with_capacity(chunks.len());
        let mut pending: Option<String> = None;

        for chunk in chunks {
            let chunk = match pending.take() {
                Some(small) => {
                    let combined = format!("{}\n\n{}", small, chunk);
                    if bounds.fits_max(&combined) {
                        combined
                    } else {
                        out.push(small);
                        chunk
                    }
                }
                None => chunk,
            };
            if bounds.below_min(&chunk) {
                pending = Some(chunk);
            } else {
                out.push(chunk);
            }
        }

        // A trailing undersized chunk merges backward.
        if let Some(small) = pending {
            match out.last_mut() {
                Some(last) if bounds.fits_max(&format!("{}\n\n{}", last, small)) => {
                    last.push_str("\n\n");
                    last.push_str(&small);
                }
                _ => out.push(small),
            }
        }
        out
    }
}

/// Split `text` with the given window and no size bounds.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    Chunker::new(ChunkerConfig::new(chunk_size, chunk_overlap))
        .split(text)
        .into_iter()
        .map(|chunk| chunk.text)
        .collect()
}

/// Whether the text contains a code fence.
pub fn has_code(text: &str) -> bool {
    text.contains(FENCE)
}

/// Number of fence markers in the text.
pub fn fence_count(text: &str) -> usize {
    text.matches(FENCE).count()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Text with code blocks swapped out for placeholder tokens.
struct Protected {
    text: String,
    blocks: Vec<String>,
    block_lens: Vec<usize>,
}

impl Protected {
    fn new(input: &str) -> Self {
        let normalized = input
            .replace("\r\n", "\n")
            .replace([PLACEHOLDER_OPEN, PLACEHOLDER_CLOSE], "");

        let mut text = String::with_capacity(normalized.len());
        let mut blocks = Vec::new();
        let mut rest = normalized.as_str();

        while let Some(start) = rest.find(FENCE) {
            text.push_str(&rest[..start]);
            let body_start = start + FENCE.len();
            let block = match rest[body_start..].find(FENCE) {
                Some(offset) => {
                    let end = body_start + offset + FENCE.len();
                    let block = rest[start..end].to_string();
                    rest = &rest[end..];
                    block
                }
                None => {
                    // Unterminated fence: the block runs to end of text.
                    let mut block = rest[start..].trim_end().to_string();
                    block.push('\n');
                    block.push_str(FENCE);
                    rest = "";
                    block
                }
            };
            text.push(PLACEHOLDER_OPEN);
            text.push_str(&blocks.len().to_string());
            text.push(PLACEHOLDER_CLOSE);
            blocks.push(block);
        }
        text.push_str(rest);

        let block_lens = blocks.iter().map(|b| char_len(b)).collect();
        Self {
            text,
            blocks,
            block_lens,
        }
    }

    /// Length of a line with placeholders counted as their real code.
    fn line_len(&self, line: &str) -> usize {
        let mut len = char_len(line);
        for caps in PLACEHOLDER_RE.captures_iter(line) {
            let token_len = char_len(&caps[0]);
            let block_len = caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| self.block_lens.get(i).copied())
                .unwrap_or(token_len);
            len = len - token_len + block_len;
        }
        len
    }

    fn restore(&self, text: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.blocks.get(i))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

fn has_placeholder(line: &str) -> bool {
    line.contains(PLACEHOLDER_OPEN)
}

/// Split placeholder text into heading-led sections of lines.
fn sections(text: &str) -> Vec<Vec<&str>> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if HEADING_RE.is_match(line) && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

fn flush(current: &mut Vec<&str>, current_len: &mut usize, out: &mut Vec<String>) {
    if !current.is_empty() {
        let text = current.join("\n");
        if !text.trim().is_empty() {
            out.push(text);
        }
    }
    current.clear();
    *current_len = 0;
}

/// Split a long prose line into pieces of at most `size` chars, at whitespace when possible.
fn hard_split(line: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut pieces = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        let cut = match rest.char_indices().nth(size) {
            None => rest.len(),
            Some((idx, _)) => match rest[..idx].rfind(char::is_whitespace) {
                Some(ws) if ws > 0 => ws,
                _ => idx,
            },
        };
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        rest = rest[cut..].trim_start();
    }
    pieces
}

/// The last `budget` chars of `line`, advanced to a word start.
fn word_tail(line: &str, budget: usize) -> Option<&str> {
    let total = char_len(line);
    let skip = total.saturating_sub(budget);
    let start = line
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    let mut tail = &line[start..];
    let at_word_start = line[..start]
        .chars()
        .next_back()
        .map_or(true, char::is_whitespace);
    if !at_word_start {
        let ws = tail.find(char::is_whitespace)?;
        tail = &tail[ws..];
    }
    let tail = tail.trim();
    if tail.is_empty() {
        None
    } else {
        Some(tail)
    }
}

/// Split an oversized chunk at line boundaries so each piece fits `max`.
///
/// Pieces that start or end inside a code block are re-fenced with the
/// block's opening fence, so fence markers stay balanced per piece.
fn force_split(text: &str, max: usize) -> Vec<String> {
    let reserve = text
        .lines()
        .filter(|line| line.contains(FENCE))
        .map(|line| char_len(&fence_opener(line)) + FENCE.len() + 2)
        .max()
        .unwrap_or(0);
    let budget = max.saturating_sub(reserve).max(MIN_FORCE_BUDGET);

    let lines: Vec<&str> = text
        .lines()
        .flat_map(|line| {
            if char_len(line) > budget && !line.contains(FENCE) {
                hard_split(line, budget)
            } else {
                vec![line]
            }
        })
        .collect();

    let mut pieces = Vec::new();
    let mut opener: Option<String> = None;
    let mut buf: Vec<&str> = Vec::new();
    let mut buf_len = 0usize;

    for line in lines {
        let len = char_len(line);
        while !buf.is_empty() && buf_len + 1 + len > budget {
            let cut = best_cut(&buf, line);
            let (head, tail) = buf.split_at(cut);
            pieces.push(render_piece(opener.as_deref(), head));
            opener = fence_state_after(opener, head);
            buf = tail.to_vec();
            buf_len = joined_len(&buf);
        }
        buf_len = if buf.is_empty() {
            len
        } else {
            buf_len + 1 + len
        };
        buf.push(line);
    }
    if !buf.is_empty() {
        pieces.push(render_piece(opener.as_deref(), &buf));
    }

    pieces.retain(|piece| {
        piece
            .lines()
            .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with(FENCE))
    });
    pieces
}

/// How many lines of `buf` to keep in the current piece.
///
/// Prefers, from the latest position backwards within the second half of
/// the buffer: a method/type boundary, then a statement boundary, then the
/// whole buffer.
fn best_cut(buf: &[&str], next: &str) -> usize {
    let n = buf.len();
    if n <= 1 {
        return n;
    }
    let floor = (n / 2).max(1);
    let line_at = |cut: usize| if cut < n { buf[cut] } else { next };

    let mut depth: i64 = 0;
    let mut closes_at = Vec::new();
    for (i, line) in buf.iter().enumerate() {
        let before = depth;
        depth += brace_delta(line);
        if before > 0 && depth <= 0 {
            closes_at.push(i + 1);
        }
    }

    if let Some(cut) = (floor..=n)
        .rev()
        .find(|&cut| SIGNATURE_RE.is_match(line_at(cut)) || closes_at.contains(&cut))
    {
        return cut;
    }
    if let Some(cut) = (floor..=n).rev().find(|&cut| ends_statement(buf[cut - 1])) {
        return cut;
    }
    n
}

fn brace_delta(line: &str) -> i64 {
    line.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

fn ends_statement(line: &str) -> bool {
    matches!(line.trim_end().chars().last(), Some(';' | '{' | '}'))
}

fn joined_len(lines: &[&str]) -> usize {
    if lines.is_empty() {
        return 0;
    }
    lines.iter().map(|l| char_len(l)).sum::<usize>() + lines.len() - 1
}

/// The fence line to reopen a block with, e.g. "```lua" from "```lua extra".
fn fence_opener(line: &str) -> String {
    let Some(pos) = line.find(FENCE) else {
        return FENCE.to_string();
    };
    let lang: String = line[pos + FENCE.len()..]
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '+' | '-' | '#'))
        .collect();
    format!("{}{}", FENCE, lang)
}

/// Opening fence still in effect after `lines`, if the block is unclosed.
fn fence_state_after(mut state: Option<String>, lines: &[&str]) -> Option<String> {
    for line in lines {
        if fence_count(line) % 2 == 1 {
            state = match state {
                Some(_) => None,
                None => Some(fence_opener(line)),
            };
        }
    }
    state
}

fn render_piece(opener: Option<&str>, lines: &[&str]) -> String {
    let mut text = String::new();
    if let Some(open) = opener {
        text.push_str(open);
        text.push('\n');
    }
    text.push_str(&lines.join("\n"));
    if fence_state_after(opener.map(str::to_string), lines).is_some() {
        text.push('\n');
        text.push_str(FENCE);
    }
    text
}
