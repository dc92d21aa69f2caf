//! Merging ranked candidate lists from hybrid search legs.
//!
//! Used by store clients that execute hybrid search client-side: each ANN
//! leg produces a ranked list of `(key, score)` pairs and the
//! [`Reranker`](crate::store::Reranker) decides how they combine.
//!
//! # Algorithms
//!
//! - Reciprocal Rank Fusion: `score(d) = Σ 1/(k + rank_i(d))`, where
//!   `rank_i(d)` is the 1-based rank of `d` in list `i`.
//! - Weighted: `score(d) = Σ w_i * score_i(d)` over the lists containing `d`.
//!
//! Ties keep the order in which keys were first seen, so results are stable
//! across runs.

use quarry_core::{Error, Result};
use std::collections::HashMap;
use std::hash::Hash;

use crate::store::Reranker;

/// A ranked list of candidates, best first.
pub type RankedList<K> = Vec<(K, f32)>;

/// Merge ranked lists with the given reranker, keeping at most `limit`.
pub fn fuse<K: Eq + Hash + Clone>(
    lists: &[RankedList<K>],
    reranker: &Reranker,
    limit: usize,
) -> Result<RankedList<K>> {
    let mut merged = match reranker {
        Reranker::Rrf { k } => reciprocal_rank_fusion(lists, *k),
        Reranker::Weighted(weights) => weighted_fusion(lists, weights)?,
    };
    merged.truncate(limit);
    Ok(merged)
}

/// Merge ranked lists using Reciprocal Rank Fusion.
///
/// Keys appearing in several lists naturally score higher.
pub fn reciprocal_rank_fusion<K: Eq + Hash + Clone>(
    lists: &[RankedList<K>],
    k: u32,
) -> RankedList<K> {
    accumulate(lists, |_, rank, _| 1.0 / (k as f32 + (rank + 1) as f32))
}

/// Merge ranked lists by a weighted sum of their scores.
///
/// Fails when the number of weights differs from the number of lists.
pub fn weighted_fusion<K: Eq + Hash + Clone>(
    lists: &[RankedList<K>],
    weights: &[f32],
) -> Result<RankedList<K>> {
    if weights.len() != lists.len() {
        return Err(Error::operation(format!(
            "weighted reranker expects {} weights, got {}",
            lists.len(),
            weights.len()
        )));
    }
    Ok(accumulate(lists, |list, _, score| weights[list] * score))
}

fn accumulate<K, F>(lists: &[RankedList<K>], contribution: F) -> RankedList<K>
where
    K: Eq + Hash + Clone,
    F: Fn(usize, usize, f32) -> f32,
{
    let mut order: Vec<K> = Vec::new();
    let mut scores: HashMap<K, f32> = HashMap::new();

    for (list_idx, list) in lists.iter().enumerate() {
        for (rank, (key, score)) in list.iter().enumerate() {
            let entry = scores.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                0.0
            });
            *entry += contribution(list_idx, rank, *score);
        }
    }

    let mut merged: RankedList<K> = order
        .into_iter()
        .map(|key| {
            let score = scores.get(&key).copied().unwrap_or_default();
            (key, score)
        })
        .collect();

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

// ============================================================================
// Tests
// ============================================================================
