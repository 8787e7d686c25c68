use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use likeness_core::{BoundingBox, EngineError, IdentityEngine, Recognition, StorageKey};
use serde::Serialize;
use zbus::{fdo, interface};

use crate::config::StoreBackend;
use crate::metrics::PerformanceMetrics;

pub const BUS_NAME: &str = "org.likeness.Likeness1";
pub const OBJECT_PATH: &str = "/org/likeness/Likeness1";

/// D-Bus interface for the Likeness identity daemon.
///
/// Bus name: org.likeness.Likeness1
/// Object path: /org/likeness/Likeness1
pub struct LikenessService {
    engine: Arc<IdentityEngine>,
    metrics: Mutex<PerformanceMetrics>,
    store: StoreBackend,
}

#[derive(Serialize)]
struct FaceReply<'a> {
    name: &'a str,
    confidence: f32,
    face_location: BoundingBox,
}

#[derive(Serialize)]
struct RecognitionReply<'a> {
    faces_detected: usize,
    results: Vec<FaceReply<'a>>,
    /// Seconds, rounded to milliseconds.
    processing_time: f64,
}

impl LikenessService {
    pub fn new(engine: Arc<IdentityEngine>, store: StoreBackend) -> Self {
        Self {
            engine,
            metrics: Mutex::new(PerformanceMetrics::new()),
            store,
        }
    }

    /// Run an engine call on the blocking pool; it may touch the disk.
    async fn blocking<T, F>(&self, f: F) -> fdo::Result<T>
    where
        F: FnOnce(&IdentityEngine) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| fdo::Error::Failed(format!("engine task failed: {e}")))?
            .map_err(to_fdo)
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, PerformanceMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[interface(name = "org.likeness.Likeness1")]
impl LikenessService {
    /// Enroll one face sample for `name`. Returns the outcome as JSON.
    async fn enroll(&self, name: &str, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(name, bytes = image.len(), "enroll requested");
        let start = Instant::now();
        let name = name.to_string();
        let outcome = self.blocking(move |e| e.enroll(&name, &image)).await?;
        if outcome.accepted {
            self.metrics().record_enrollment(start.elapsed());
        }
        to_json(&outcome)
    }

    /// Identify every face in `image`. Returns results as JSON.
    async fn recognize(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::debug!(bytes = image.len(), "recognize requested");
        let recognition = self.blocking(move |e| e.recognize(&image)).await?;
        self.metrics().record_recognition(recognition.elapsed);
        recognition_json(&recognition)
    }

    /// Remove one enrolled sample. False if the key is unknown.
    async fn delete_sample(&self, key: &str) -> fdo::Result<bool> {
        tracing::info!(key, "delete_sample requested");
        let key = StorageKey::from(key);
        self.blocking(move |e| e.delete_sample(&key)).await
    }

    /// Gallery composition as JSON.
    async fn statistics(&self) -> fdo::Result<String> {
        to_json(&self.engine.statistics())
    }

    /// Enrolled samples (key, identity, created_at) as JSON.
    async fn list_samples(&self) -> fdo::Result<String> {
        to_json(&self.engine.list_samples())
    }

    /// Rebuild the gallery from storage. Returns the sample count.
    async fn reload(&self) -> fdo::Result<u32> {
        tracing::info!("reload requested");
        let samples = self.blocking(|e| e.reload()).await?;
        Ok(u32::try_from(samples).unwrap_or(u32::MAX))
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let stats = self.engine.statistics();
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "store": format!("{:?}", self.store).to_lowercase(),
            "identities": stats.identity_count,
            "samples": stats.total_samples,
            "matcher": self.engine.config(),
            "metrics": self.metrics().report(),
        }))
    }
}

fn to_fdo(err: EngineError) -> fdo::Error {
    match err {
        EngineError::InvalidImage(_) => fdo::Error::InvalidArgs(err.to_string()),
        other => {
            tracing::warn!(error = %other, "engine call failed");
            fdo::Error::Failed(other.to_string())
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serialize: {e}")))
}

fn recognition_json(recognition: &Recognition) -> fdo::Result<String> {
    let reply = RecognitionReply {
        faces_detected: recognition.results.len(),
        results: recognition
            .results
            .iter()
            .map(|r| FaceReply {
                name: r.label(),
                confidence: r.confidence,
                face_location: r.region,
            })
            .collect(),
        processing_time: (recognition.elapsed.as_secs_f64() * 1000.0).round() / 1000.0,
    };
    to_json(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use likeness_core::{FileStore, FullFrameDetector, MatcherConfig, PixelEmbedder, RecognitionResult};
    use std::time::Duration;

    fn service() -> (tempfile::TempDir, LikenessService) {
        let dir = tempfile::tempdir().unwrap();
        let engine = IdentityEngine::open(
            Box::new(FileStore::open(dir.path()).unwrap()),
            Box::new(FullFrameDetector),
            Box::new(PixelEmbedder::new(8)),
            MatcherConfig::default(),
        )
        .unwrap();
        (dir, LikenessService::new(Arc::new(engine), StoreBackend::File))
    }

    #[test]
    fn test_recognition_json_shape() {
        let recognition = Recognition {
            results: vec![
                RecognitionResult {
                    identity: Some("alice".into()),
                    confidence: 87.5,
                    region: BoundingBox::full_frame(10, 10),
                },
                RecognitionResult {
                    identity: None,
                    confidence: 0.0,
                    region: BoundingBox::full_frame(4, 4),
                },
            ],
            elapsed: Duration::from_micros(12_345),
        };
        let v: serde_json::Value =
            serde_json::from_str(&recognition_json(&recognition).unwrap()).unwrap();
        assert_eq!(v["faces_detected"], 2);
        assert_eq!(v["results"][0]["name"], "alice");
        assert_eq!(v["results"][1]["name"], "Unknown");
        assert_eq!(v["results"][0]["face_location"]["width"], 10.0);
        assert_eq!(v["processing_time"], 0.012);
    }

    #[test]
    fn test_invalid_image_maps_to_invalid_args() {
        let err = to_fdo(EngineError::InvalidImage("bad header".into()));
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn test_blocking_runs_engine_calls() {
        let (_dir, svc) = service();
        let stats = svc.blocking(|e| Ok(e.statistics())).await.unwrap();
        assert_eq!(stats.total_samples, 0);

        let deleted = svc
            .blocking(|e| e.delete_sample(&StorageKey::from("nobody_0_00000000")))
            .await
            .unwrap();
        assert!(!deleted);
    }

    #[tokio::test]
    async fn test_blocking_maps_errors() {
        let (_dir, svc) = service();
        let err = svc.blocking(|e| e.recognize(b"not an image")).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));
    }
}
