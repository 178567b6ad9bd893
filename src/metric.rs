use serde::{Deserialize, Serialize};

use crate::error::MetricError;

/// Fixed-length identity vector for one face.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
}

impl DistanceMetric {
    pub fn distance(self, a: &Embedding, b: &Embedding) -> Result<f32, MetricError> {
        match self {
            DistanceMetric::Cosine => cosine_distance(a.as_slice(), b.as_slice()),
        }
    }
}

/// Cosine distance `1 - a·b / (|a| |b|)`.
///
/// Accumulates in `f64` in index order so identical inputs always give the
/// same bits. The result is clamped to `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, MetricError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(MetricError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        return Err(MetricError::DegenerateVector);
    }

    let similarity = dot / (norm_a * norm_b).sqrt();
    Ok((1.0 - similarity).clamp(0.0, 2.0) as f32)
}
