//! Vector similarity utilities.

use toolbox_core::MemoryHit;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank `(hit, embedding)` pairs by cosine similarity to a query embedding.
///
/// Returns at most `limit` hits sorted by descending similarity, with
/// `score` set. Ties keep insertion order. There is no score threshold:
/// recall always returns the nearest memories.
pub fn vector_search<'a, I>(candidates: I, query_embedding: &[f32], limit: usize) -> Vec<MemoryHit>
where
    I: IntoIterator<Item = (MemoryHit, &'a [f32])>,
{
    let mut scored: Vec<MemoryHit> = candidates
        .into_iter()
        .map(|(mut hit, emb)| {
            hit.score = cosine_similarity(emb, query_embedding);
            hit
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}
