//! likeness-core: identity matching over a gallery of face embeddings.
//!
//! Holds enrolled embeddings per identity, compares probes by cosine
//! distance, and accepts a match only when the candidate identity's own
//! samples agree.

pub mod distance;
pub mod engine;
pub mod gallery;
pub mod matcher;
pub mod stats;
pub mod store;
pub mod types;
pub mod vision;

pub use engine::{EngineError, EnrollmentOutcome, IdentityEngine, Recognition, RecognitionResult};
pub use gallery::GalleryIndex;
pub use matcher::{ConsensusMatcher, MatchOutcome, Matcher, MatcherConfig};
pub use stats::GalleryStatistics;
pub use store::{EmbeddingStore, FileStore, SqliteStore, StoreError};
pub use types::{BoundingBox, Embedding, SampleInfo, SampleRecord, StorageKey};
pub use vision::{EmbeddingExtractor, FaceDetector, FullFrameDetector, PixelEmbedder};
