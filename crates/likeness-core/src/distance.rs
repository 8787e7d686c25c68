//! Cosine-based dissimilarity between embeddings.
//!
//! Distances are `1 - cosine_similarity`, clamped at zero, so they do not
//! depend on vector length or overall scale. Confidence is a display score
//! derived from distance; it is not a calibrated probability.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistanceError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("cannot compare empty embeddings")]
    Empty,
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Cosine similarity in [-1, 1]. A zero-norm input has similarity 0.
///
/// Always processes every dimension; mismatched lengths are rejected rather
/// than truncated. Sums are accumulated in `f64` so large finite inputs do
/// not overflow. NaN or infinite components are `DistanceError::NonFinite`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, DistanceError> {
    if a.len() != b.len() {
        return Err(DistanceError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(DistanceError::Empty);
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        if !x.is_finite() || !y.is_finite() {
            return Err(DistanceError::NonFinite);
        }
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    let sim = if denom > 0.0 { dot / denom } else { 0.0 };
    if !sim.is_finite() {
        return Err(DistanceError::NonFinite);
    }
    Ok(sim.clamp(-1.0, 1.0) as f32)
}

/// `max(0, 1 - cosine_similarity)`. Ranges over [0, 2].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, DistanceError> {
    Ok((1.0 - cosine_similarity(a, b)?).max(0.0))
}

/// Binary match predicate. Inclusive: a distance equal to the tolerance matches.
pub fn is_match(distance: f32, tolerance: f32) -> bool {
    distance <= tolerance
}

/// Confidence percentage `max(0, (1 - distance) * 100)`.
pub fn confidence(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).max(0.0)
}

/// Round to two decimal places for reporting.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
