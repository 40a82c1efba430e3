//! Retrieval ranking: diversity-aware re-ranking over similarity candidates.
//!
//! # Maximal Marginal Relevance
//!
//! Given candidates already fetched by plain similarity (usually
//! `k × fetch_k_multiplier` of them), MMR picks results one at a time:
//!
//! ```text
//! mmr(d) = λ × sim(query, d) − (1 − λ) × max sim(d, s) for s in selected
//! ```
//!
//! `λ = 1` reproduces plain similarity order; lower values trade relevance
//! for diversity among the selected chunks.

use crate::embedding::cosine_similarity;
use crate::store::ScoredEntry;

/// Re-rank `candidates` with Maximal Marginal Relevance, returning up to `k`.
///
/// Candidates are expected in similarity order; ties keep that order.
/// `lambda` is clamped to `[0, 1]`.
pub fn mmr_rerank(
    query: &[f32],
    candidates: Vec<ScoredEntry>,
    k: usize,
    lambda: f32,
) -> Vec<ScoredEntry> {
    let lambda = lambda.clamp(0.0, 1.0);
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, &c.embedding))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx].embedding, &candidates[s].embedding))
                .fold(0.0f32, f32::max);
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        selected.push(remaining.remove(best_pos));
    }

    let mut slots: Vec<Option<ScoredEntry>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect()
}
