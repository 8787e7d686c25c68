//! Identity engine: enrollment, recognition and gallery maintenance.
//!
//! The gallery is held as `RwLock<Arc<GalleryIndex>>`. Readers clone the
//! `Arc` and match against that snapshot without holding the lock. Mutations
//! serialize on `writer`, do their storage I/O, build the next index and swap
//! it in, so a reader sees either the old index or the new one, never a mix.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

use crate::distance::DistanceError;
use crate::gallery::GalleryIndex;
use crate::matcher::{ConfigError, ConsensusMatcher, MatchOutcome, Matcher, MatcherConfig};
use crate::stats::GalleryStatistics;
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{BoundingBox, Embedding, SampleInfo, SampleRecord, StorageKey};
use crate::vision::{EmbeddingExtractor, FaceDetector, VisionError};

const MSG_EMPTY_NAME: &str = "Identity name must not be empty";
const MSG_NO_FACE: &str = "No face detected in the image";
const MSG_MULTIPLE_FACES: &str = "Multiple faces detected. Please use an image with only one face";
const MSG_NON_FINITE: &str = "Face embedding contains invalid values";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("distance error: {0}")]
    Distance(#[from] DistanceError),
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid image data: {0}")]
    InvalidImage(String),
}

/// Result of an enrollment attempt. Rejections are input problems, reported
/// here rather than as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentOutcome {
    pub accepted: bool,
    pub message: String,
    pub key: Option<StorageKey>,
}

impl EnrollmentOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            key: None,
        }
    }
}

/// Decision for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    /// Matched identity, `None` for Unknown.
    pub identity: Option<String>,
    pub confidence: f32,
    pub region: BoundingBox,
}

impl RecognitionResult {
    /// Identity name, or "Unknown".
    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or("Unknown")
    }
}

/// All faces found in one image, with the time it took.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub results: Vec<RecognitionResult>,
    pub elapsed: Duration,
}

pub struct IdentityEngine {
    store: Box<dyn EmbeddingStore>,
    detector: Box<dyn FaceDetector>,
    extractor: Box<dyn EmbeddingExtractor>,
    matcher: ConsensusMatcher,
    gallery: RwLock<Arc<GalleryIndex>>,
    writer: Mutex<()>,
}

impl IdentityEngine {
    /// Validate `config` and load the gallery from `store`.
    pub fn open(
        store: Box<dyn EmbeddingStore>,
        detector: Box<dyn FaceDetector>,
        extractor: Box<dyn EmbeddingExtractor>,
        config: MatcherConfig,
    ) -> Result<Self, EngineError> {
        let matcher = ConsensusMatcher::new(config)?;
        let index = build_index(store.load_all()?);

        tracing::info!(
            identities = index.identity_count(),
            samples = index.sample_count(),
            tolerance = config.tolerance,
            confidence_threshold = config.confidence_threshold,
            "gallery loaded"
        );

        Ok(Self {
            store,
            detector,
            extractor,
            matcher,
            gallery: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        self.matcher.config()
    }

    /// Consistent view of the gallery as of now.
    pub fn snapshot(&self) -> Arc<GalleryIndex> {
        Arc::clone(&self.gallery.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, next: GalleryIndex) {
        *self.gallery.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Enroll one sample for `identity_name`. The image must contain exactly
    /// one face. Whether the new sample resembles earlier samples of the same
    /// identity does not affect the outcome.
    pub fn enroll(&self, identity_name: &str, image: &[u8]) -> Result<EnrollmentOutcome, EngineError> {
        let name = identity_name.trim();
        if name.is_empty() {
            return Ok(EnrollmentOutcome::rejected(MSG_EMPTY_NAME));
        }

        let image = match decode_image(image) {
            Ok(image) => image,
            Err(e) => return Ok(EnrollmentOutcome::rejected(e.to_string())),
        };

        let faces = self.detector.detect(&image)?;
        let face = match faces.as_slice() {
            [] => {
                tracing::info!(identity = name, "enroll rejected: no face");
                return Ok(EnrollmentOutcome::rejected(MSG_NO_FACE));
            }
            [face] => face,
            _ => {
                tracing::info!(identity = name, faces = faces.len(), "enroll rejected: multiple faces");
                return Ok(EnrollmentOutcome::rejected(MSG_MULTIPLE_FACES));
            }
        };

        let embedding = match self.extractor.extract(&image, face) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(identity = name, error = %e, "enroll rejected: extraction failed");
                return Ok(EnrollmentOutcome::rejected(e.to_string()));
            }
        };
        if !embedding.is_finite() {
            tracing::warn!(identity = name, "enroll rejected: non-finite embedding");
            return Ok(EnrollmentOutcome::rejected(MSG_NON_FINITE));
        }

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        if let Some(dim) = current.dimension() {
            if dim != embedding.dim() {
                return Err(DistanceError::DimensionMismatch {
                    left: embedding.dim(),
                    right: dim,
                }
                .into());
            }
        }

        let record = self.store.persist(name, &embedding)?;
        let key = record.key.clone();

        let mut next = GalleryIndex::clone(&current);
        next.insert(record);
        let samples = next.samples_for_count(name);
        self.swap(next);

        tracing::info!(identity = name, key = %key, samples, "sample enrolled");

        let message = if samples > 1 {
            format!("Face enrolled successfully for {name} ({samples} samples on file)")
        } else {
            format!("Face enrolled successfully for {name}")
        };

        Ok(EnrollmentOutcome {
            accepted: true,
            message,
            key: Some(key),
        })
    }

    /// Detect every face in `image` and identify each one.
    pub fn recognize(&self, image: &[u8]) -> Result<Recognition, EngineError> {
        let start = Instant::now();
        let image = decode_image(image)?;
        let faces = self.detector.detect(&image)?;
        let gallery = self.snapshot();

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            let outcome = match self.extractor.extract(&image, &face) {
                Ok(embedding) if embedding.is_finite() => {
                    self.matcher.identify(&embedding, &gallery)?
                }
                Ok(_) => {
                    tracing::warn!(region = ?face, "non-finite embedding; reporting Unknown");
                    MatchOutcome::unknown()
                }
                Err(e) => {
                    tracing::warn!(error = %e, region = ?face, "extraction failed; reporting Unknown");
                    MatchOutcome::unknown()
                }
            };
            results.push(RecognitionResult {
                identity: outcome.identity,
                confidence: outcome.confidence,
                region: face,
            });
        }

        let elapsed = start.elapsed();
        tracing::debug!(
            faces = results.len(),
            matched = results.iter().filter(|r| r.identity.is_some()).count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "recognition complete"
        );

        Ok(Recognition { results, elapsed })
    }

    /// Match an already extracted embedding against the gallery.
    pub fn recognize_embedding(&self, probe: &Embedding) -> Result<MatchOutcome, EngineError> {
        Ok(self.matcher.identify(probe, &self.snapshot())?)
    }

    /// Delete one sample. Unknown keys return `Ok(false)`.
    pub fn delete_sample(&self, key: &StorageKey) -> Result<bool, EngineError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.store.delete(key)? {
            tracing::debug!(key = %key, "delete: no such sample");
            return Ok(false);
        }

        let mut next = GalleryIndex::clone(&self.snapshot());
        next.remove(key);
        self.swap(next);

        tracing::info!(key = %key, "sample deleted");
        Ok(true)
    }

    /// Rebuild the gallery from the store. Returns the number of samples loaded.
    pub fn reload(&self) -> Result<usize, EngineError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let index = build_index(self.store.load_all()?);
        let samples = index.sample_count();
        self.swap(index);
        tracing::info!(samples, "gallery reloaded");
        Ok(samples)
    }

    pub fn statistics(&self) -> GalleryStatistics {
        GalleryStatistics::from_index(&self.snapshot())
    }

    pub fn list_samples(&self) -> Vec<SampleInfo> {
        self.snapshot()
            .all_embeddings()
            .iter()
            .map(|s| SampleInfo {
                key: s.key.clone(),
                identity: s.identity.clone(),
                created_at: s.created_at,
            })
            .collect()
    }
}

fn decode_image(bytes: &[u8]) -> Result<DynamicImage, EngineError> {
    image::load_from_memory(bytes).map_err(|e| EngineError::InvalidImage(e.to_string()))
}

/// Index `records`, dropping any with non-finite values or whose dimension
/// differs from the oldest finite record's.
fn build_index(records: Vec<SampleRecord>) -> GalleryIndex {
    let (records, broken): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|r| r.embedding.is_finite());
    for record in &broken {
        tracing::warn!(key = %record.key, "skipping sample with non-finite values");
    }

    let expected = records.first().map(|r| r.embedding.dim());
    let mut index = GalleryIndex::new();
    for record in records {
        if Some(record.embedding.dim()) == expected {
            index.insert(record);
        } else {
            tracing::warn!(
                key = %record.key,
                dim = record.embedding.dim(),
                expected = expected.unwrap_or_default(),
                "skipping sample with mismatched dimension"
            );
        }
    }
    index
}
