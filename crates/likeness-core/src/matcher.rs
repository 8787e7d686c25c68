//! Two-pass consensus matching of a probe embedding against the gallery.
//!
//! Pass one scans every sample to shortlist the nearest identity. Pass two
//! re-scores the probe against all samples of that identity and accepts only
//! if the group corroborates the match.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distance::{self, DistanceError};
use crate::gallery::GalleryIndex;
use crate::types::Embedding;

// --- Defaults ---
const DEFAULT_TOLERANCE: f32 = 0.45;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 60.0;
const DEFAULT_CONSENSUS_MATCH_RATE: f32 = 0.5;
const DEFAULT_CERTAINTY_DISTANCE: f32 = 0.4;

/// Largest possible cosine distance.
const MAX_DISTANCE: f32 = 2.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
}

/// Matching thresholds. All four are independently tunable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum distance for a pairwise match. Valid range (0, 2]; lower is stricter.
    pub tolerance: f32,
    /// Minimum confidence percentage to accept a candidate. Valid range [0, 100].
    pub confidence_threshold: f32,
    /// Fraction of an identity's samples that must be within tolerance when
    /// it has two or more samples. Valid range [0, 1].
    pub consensus_match_rate: f32,
    /// A multi-sample identity is accepted regardless of match rate when its
    /// best sample is strictly closer than this. Valid range [0, 2].
    pub certainty_distance: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            consensus_match_rate: DEFAULT_CONSENSUS_MATCH_RATE,
            certainty_distance: DEFAULT_CERTAINTY_DISTANCE,
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance > 0.0 && self.tolerance <= MAX_DISTANCE) {
            return Err(ConfigError::OutOfRange {
                field: "tolerance",
                value: self.tolerance,
                min: 0.0,
                max: MAX_DISTANCE,
            });
        }
        check_range("confidence_threshold", self.confidence_threshold, 0.0, 100.0)?;
        check_range("consensus_match_rate", self.consensus_match_rate, 0.0, 1.0)?;
        check_range("certainty_distance", self.certainty_distance, 0.0, MAX_DISTANCE)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    // Written so NaN fails the check.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Decision for one probe, with the numbers it was based on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// Accepted identity, or `None` for Unknown.
    pub identity: Option<String>,
    /// Confidence percentage rounded to two decimals; 0 when rejected.
    pub confidence: f32,
    /// Identity shortlisted by the global scan, accepted or not.
    pub candidate: Option<String>,
    /// Best distance within the candidate's samples.
    pub best_distance: Option<f32>,
    /// Fraction of the candidate's samples within tolerance.
    pub match_rate: f32,
    /// Number of candidate samples re-scored in the second pass.
    pub samples_compared: usize,
}

impl MatchOutcome {
    pub fn unknown() -> Self {
        Self {
            identity: None,
            confidence: 0.0,
            candidate: None,
            best_distance: None,
            match_rate: 0.0,
            samples_compared: 0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

/// Strategy for deciding which enrolled identity, if any, a probe belongs to.
pub trait Matcher: Send + Sync {
    fn identify(&self, probe: &Embedding, gallery: &GalleryIndex) -> Result<MatchOutcome, DistanceError>;
}

/// Nearest-neighbour shortlist followed by within-identity consensus.
#[derive(Debug, Clone, Default)]
pub struct ConsensusMatcher {
    config: MatcherConfig,
}

impl ConsensusMatcher {
    pub fn new(config: MatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    fn accepts(&self, subset_len: usize, best_distance: f32, match_rate: f32, confidence: f32) -> bool {
        let cfg = &self.config;
        if confidence < cfg.confidence_threshold {
            return false;
        }
        if subset_len == 1 {
            return distance::is_match(best_distance, cfg.tolerance);
        }
        match_rate >= cfg.consensus_match_rate || best_distance < cfg.certainty_distance
    }
}

impl Matcher for ConsensusMatcher {
    fn identify(&self, probe: &Embedding, gallery: &GalleryIndex) -> Result<MatchOutcome, DistanceError> {
        // Pass one: full scan, strict `<` keeps the first of equal distances.
        let mut best: Option<(f32, &str)> = None;
        for sample in gallery.all_embeddings() {
            let d = probe.distance(&sample.embedding)?;
            if best.map_or(true, |(best_d, _)| d < best_d) {
                best = Some((d, sample.identity.as_str()));
            }
        }

        let Some((_, candidate)) = best else {
            return Ok(MatchOutcome::unknown());
        };

        // Pass two: corroborate against every sample of the candidate.
        let subset = gallery.embeddings_for(candidate);
        if subset.is_empty() {
            return Ok(MatchOutcome::unknown());
        }

        let mut best_distance = f32::INFINITY;
        let mut within = 0usize;
        for sample in subset {
            let d = probe.distance(&sample.embedding)?;
            best_distance = best_distance.min(d);
            if distance::is_match(d, self.config.tolerance) {
                within += 1;
            }
        }

        let match_rate = within as f32 / subset.len() as f32;
        let confidence = distance::confidence(best_distance);
        let accepted = self.accepts(subset.len(), best_distance, match_rate, confidence);

        tracing::debug!(
            candidate,
            samples = subset.len(),
            best_distance,
            match_rate,
            confidence,
            accepted,
            "consensus decision"
        );

        Ok(MatchOutcome {
            identity: accepted.then(|| candidate.to_string()),
            confidence: if accepted { distance::round2(confidence) } else { 0.0 },
            candidate: Some(candidate.to_string()),
            best_distance: Some(best_distance),
            match_rate,
            samples_compared: subset.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::tests::record;
    use crate::types::SampleRecord;

    fn probe() -> Embedding {
        Embedding::new(vec![1.0, 0.0])
    }

    /// Unit vector at cosine similarity `sim` to `probe()`.
    fn at_similarity(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).sqrt()]
    }

    fn gallery(records: Vec<SampleRecord>) -> GalleryIndex {
        GalleryIndex::from_records(records)
    }

    fn matcher(config: MatcherConfig) -> ConsensusMatcher {
        ConsensusMatcher::new(config).unwrap()
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let out = ConsensusMatcher::default()
            .identify(&probe(), &GalleryIndex::new())
            .unwrap();
        assert_eq!(out, MatchOutcome::unknown());
        assert!(!out.is_match());
    }

    #[test]
    fn test_single_sample_exact_match() {
        let g = gallery(vec![
            record("a1", "alice", vec![1.0, 0.0]),
            record("b1", "bob", vec![0.0, 1.0]),
        ]);
        let out = ConsensusMatcher::default().identify(&probe(), &g).unwrap();
        assert_eq!(out.identity.as_deref(), Some("alice"));
        assert_eq!(out.confidence, 100.0);
        assert_eq!(out.samples_compared, 1);
    }

    #[test]
    fn test_single_sample_beyond_tolerance_rejected() {
        // Distance 0.48: confidence 52 clears the threshold, tolerance does not.
        let g = gallery(vec![record("a1", "alice", at_similarity(0.52))]);
        let cfg = MatcherConfig {
            confidence_threshold: 50.0,
            ..MatcherConfig::default()
        };
        let out = matcher(cfg).identify(&probe(), &g).unwrap();
        assert!(!out.is_match());
        assert_eq!(out.confidence, 0.0);
        assert_eq!(out.candidate.as_deref(), Some("alice"));
    }

    #[test]
    fn test_low_confidence_rejected() {
        // Distance 0.43: within tolerance but confidence 57 < 60.
        let g = gallery(vec![record("a1", "alice", at_similarity(0.57))]);
        let out = ConsensusMatcher::default().identify(&probe(), &g).unwrap();
        assert!(!out.is_match());
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn test_certainty_override_rescues_noisy_group() {
        let g = gallery(vec![
            record("a1", "alice", vec![0.0, 1.0]),
            record("a2", "alice", at_similarity(0.65)),
            record("a3", "alice", vec![-0.2, 1.0]),
            record("b1", "bob", vec![-1.0, 0.0]),
        ]);
        let out = ConsensusMatcher::default().identify(&probe(), &g).unwrap();
        assert_eq!(out.identity.as_deref(), Some("alice"));
        assert!((out.match_rate - 1.0 / 3.0).abs() < 1e-6);
        assert!((out.best_distance.unwrap() - 0.35).abs() < 1e-4);
        assert!((out.confidence - 65.0).abs() < 0.02);
    }

    #[test]
    fn test_override_disabled_rejects_noisy_group() {
        let g = gallery(vec![
            record("a1", "alice", vec![0.0, 1.0]),
            record("a2", "alice", at_similarity(0.65)),
            record("a3", "alice", vec![-0.2, 1.0]),
        ]);
        let cfg = MatcherConfig {
            certainty_distance: 0.3,
            ..MatcherConfig::default()
        };
        let out = matcher(cfg).identify(&probe(), &g).unwrap();
        assert!(!out.is_match());
    }

    #[test]
    fn test_majority_consensus_accepts() {
        // Best distance 0.42 is not below the certainty distance, but two of
        // three samples are within tolerance.
        let g = gallery(vec![
            record("a1", "alice", at_similarity(0.58)),
            record("a2", "alice", at_similarity(0.56)),
            record("a3", "alice", vec![0.0, 1.0]),
        ]);
        let cfg = MatcherConfig {
            confidence_threshold: 50.0,
            ..MatcherConfig::default()
        };
        let out = matcher(cfg).identify(&probe(), &g).unwrap();
        assert_eq!(out.identity.as_deref(), Some("alice"));
        assert!((out.match_rate - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_minority_consensus_rejects() {
        let g = gallery(vec![
            record("a1", "alice", at_similarity(0.58)),
            record("a2", "alice", at_similarity(0.1)),
            record("a3", "alice", at_similarity(0.05)),
        ]);
        let cfg = MatcherConfig {
            confidence_threshold: 50.0,
            ..MatcherConfig::default()
        };
        let out = matcher(cfg).identify(&probe(), &g).unwrap();
        assert!(!out.is_match());
        assert_eq!(out.samples_compared, 3);
    }

    #[test]
    fn test_nearest_identity_is_shortlisted_not_first() {
        let g = gallery(vec![
            record("b1", "bob", at_similarity(0.7)),
            record("a1", "alice", at_similarity(0.95)),
        ]);
        let out = ConsensusMatcher::default().identify(&probe(), &g).unwrap();
        assert_eq!(out.identity.as_deref(), Some("alice"));
    }

    #[test]
    fn test_tie_goes_to_first_inserted() {
        let g = gallery(vec![
            record("b1", "bob", vec![1.0, 0.0]),
            record("a1", "alice", vec![1.0, 0.0]),
        ]);
        let out = ConsensusMatcher::default().identify(&probe(), &g).unwrap();
        assert_eq!(out.identity.as_deref(), Some("bob"));
    }

    #[test]
    fn test_confidence_threshold_is_inclusive() {
        let sample = at_similarity(0.8);
        let d = probe().distance(&Embedding::new(sample.clone())).unwrap();
        let exact = distance::confidence(d);
        let g = gallery(vec![record("a1", "alice", sample)]);

        let at = MatcherConfig {
            confidence_threshold: exact,
            ..MatcherConfig::default()
        };
        assert!(matcher(at).identify(&probe(), &g).unwrap().is_match());

        let above = MatcherConfig {
            confidence_threshold: exact + 1.0,
            ..MatcherConfig::default()
        };
        assert!(!matcher(above).identify(&probe(), &g).unwrap().is_match());
    }

    #[test]
    fn test_dimension_mismatch_propagates() {
        let g = gallery(vec![record("a1", "alice", vec![1.0, 0.0, 0.0])]);
        let err = ConsensusMatcher::default().identify(&probe(), &g).unwrap_err();
        assert_eq!(err, DistanceError::DimensionMismatch { left: 2, right: 3 });
    }

    #[test]
    fn test_infinite_sample_is_never_nearest() {
        let g = gallery(vec![
            record("a1", "alice", vec![0.0, 1.0]),
            record("m1", "mallory", vec![f32::INFINITY, 1.0]),
        ]);
        let probe = Embedding::new(vec![0.3, 0.7]);
        let err = ConsensusMatcher::default().identify(&probe, &g).unwrap_err();
        assert_eq!(err, DistanceError::NonFinite);
    }

    #[test]
    fn test_config_validation() {
        assert!(MatcherConfig::default().validate().is_ok());

        let bad = MatcherConfig {
            tolerance: 0.0,
            ..MatcherConfig::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::OutOfRange { field: "tolerance", .. })
        ));

        let bad = MatcherConfig {
            confidence_threshold: 120.0,
            ..MatcherConfig::default()
        };
        assert!(ConsensusMatcher::new(bad).is_err());

        let bad = MatcherConfig {
            consensus_match_rate: f32::NAN,
            ..MatcherConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let cfg: MatcherConfig = serde_json::from_str(r#"{"tolerance": 0.5}"#).unwrap();
        assert_eq!(cfg.tolerance, 0.5);
        assert_eq!(cfg.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(cfg.certainty_distance, DEFAULT_CERTAINTY_DISTANCE);
    }
}
