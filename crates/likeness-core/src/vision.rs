//! Face localization and embedding extraction seams.
//!
//! The engine only sees these two traits. [`FullFrameDetector`] and
//! [`PixelEmbedder`] are lightweight reference implementations for
//! pre-cropped portrait images; model-backed implementations plug in the
//! same way.

use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

use crate::types::{BoundingBox, Embedding};

const PIXEL_EMBEDDER_DEFAULT_SIZE: u32 = 100;
pub const PIXEL_EMBEDDER_MIN_SIZE: u32 = 8;
pub const PIXEL_EMBEDDER_MAX_SIZE: u32 = 1024;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("face region {0:?} lies outside the image")]
    RegionOutOfBounds(BoundingBox),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
    #[error("embedding extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Locates faces in an image. Zero, one or many regions.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Produces a fixed-length embedding for one face region.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &DynamicImage, face: &BoundingBox) -> Result<Embedding, VisionError>;
}

/// Treats the whole image as a single face. Suitable for pre-cropped
/// portraits; an empty image has no face.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, VisionError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox::full_frame(image.width(), image.height())])
    }
}

/// Grayscale pixel-intensity embedding.
///
/// Crops the face, resizes it to `size` × `size`, converts to 8-bit luma and
/// L2-normalizes the flattened pixels. Dimension is `size²`.
#[derive(Debug, Clone, Copy)]
pub struct PixelEmbedder {
    size: u32,
}

impl Default for PixelEmbedder {
    fn default() -> Self {
        Self {
            size: PIXEL_EMBEDDER_DEFAULT_SIZE,
        }
    }
}

impl PixelEmbedder {
    /// `size` is clamped to `PIXEL_EMBEDDER_MIN_SIZE..=PIXEL_EMBEDDER_MAX_SIZE`.
    pub fn new(size: u32) -> Self {
        Self {
            size: size.clamp(PIXEL_EMBEDDER_MIN_SIZE, PIXEL_EMBEDDER_MAX_SIZE),
        }
    }

    pub fn dim(&self) -> usize {
        let side = self.size as usize;
        side * side
    }

    pub fn model_version(&self) -> String {
        format!("pixel-{}", self.size)
    }
}

impl EmbeddingExtractor for PixelEmbedder {
    fn extract(&self, image: &DynamicImage, face: &BoundingBox) -> Result<Embedding, VisionError> {
        let (x, y, w, h) = face
            .to_pixels(image.width(), image.height())
            .ok_or(VisionError::RegionOutOfBounds(*face))?;

        let gray = image
            .crop_imm(x, y, w, h)
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_luma8();

        let raw: Vec<f32> = gray.as_raw().iter().map(|&p| p as f32).collect();
        let norm: f32 = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(VisionError::ExtractionFailed(
                "face region is completely black".into(),
            ));
        }

        Ok(Embedding {
            values: raw.iter().map(|v| v / norm).collect(),
            model_version: Some(self.model_version()),
        })
    }
}
