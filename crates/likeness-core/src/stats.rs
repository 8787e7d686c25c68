//! Gallery composition counts for reporting.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::gallery::GalleryIndex;

/// Composition of the gallery at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GalleryStatistics {
    pub total_samples: usize,
    pub identity_count: usize,
    /// Identities with more than one enrolled sample.
    pub people_with_multiple_encodings: usize,
    pub samples_per_identity: BTreeMap<String, usize>,
}

impl GalleryStatistics {
    pub fn from_index(index: &GalleryIndex) -> Self {
        let samples_per_identity: BTreeMap<String, usize> = index
            .identities()
            .map(|(name, count)| (name.to_string(), count))
            .collect();

        Self {
            total_samples: index.sample_count(),
            identity_count: samples_per_identity.len(),
            people_with_multiple_encodings: samples_per_identity.values().filter(|&&n| n > 1).count(),
            samples_per_identity,
        }
    }

    /// Sample count for one identity; 0 if unknown.
    pub fn sample_count(&self, identity: &str) -> usize {
        self.samples_per_identity.get(identity).copied().unwrap_or(0)
    }
}
