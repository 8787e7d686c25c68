use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::distance::{self, DistanceError};

/// Rectangular face region in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1]. Detectors without a score report 1.0.
    pub confidence: f32,
}

impl BoundingBox {
    /// Region covering a whole `width` × `height` image.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            confidence: 1.0,
        }
    }

    /// Clamp the region to image bounds and return integer pixel coordinates
    /// `(x, y, width, height)`. Returns `None` when nothing is left.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(image_width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(image_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector produced by an external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Extractor that produced this embedding (e.g., "pixel-100").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, DistanceError> {
        distance::cosine_similarity(&self.values, &other.values)
    }

    /// Cosine distance `max(0, 1 - similarity)`. 0 = identical direction.
    pub fn distance(&self, other: &Embedding) -> Result<f32, DistanceError> {
        distance::cosine_distance(&self.values, &other.values)
    }
}

/// Opaque key identifying one persisted sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// One persisted enrollment: identity, embedding and when it was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub key: StorageKey,
    pub identity: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

/// Metadata view of a sample, without the embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleInfo {
    pub key: StorageKey,
    pub identity: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(matches!(
            a.distance(&b),
            Err(DistanceError::DimensionMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn test_bbox_to_pixels_clamps() {
        let bbox = BoundingBox {
            x: -5.0,
            y: 2.5,
            width: 20.0,
            height: 100.0,
            confidence: 0.9,
        };
        assert_eq!(bbox.to_pixels(10, 50), Some((0, 2, 10, 48)));
    }

    #[test]
    fn test_bbox_to_pixels_outside() {
        let bbox = BoundingBox {
            x: 60.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 1.0,
        };
        assert_eq!(bbox.to_pixels(50, 50), None);
    }

    #[test]
    fn test_storage_key_serializes_as_string() {
        let key = StorageKey::new("alice_1_deadbeef");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"alice_1_deadbeef\"");
    }
}
