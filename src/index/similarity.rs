//! Vector similarity helpers.

use std::cmp::Ordering;

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with precomputed norms; zero vectors score `0.0`.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32, b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

/// Indices and scores of the `k` highest-scoring items, best first.
///
/// Ties keep the earlier item first so equal scores follow document order.
pub(crate) fn top_k(scores: impl IntoIterator<Item = f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|(left_idx, left), (right_idx, right)| {
        right
            .partial_cmp(left)
            .unwrap_or(Ordering::Equal)
            .then(left_idx.cmp(right_idx))
    });
    ranked.truncate(k);
    ranked
}
