//! In-memory gallery of enrolled samples.
//!
//! Two views over the same `Arc<SampleRecord>` values: a flat list in
//! insertion order for the global nearest-neighbour scan, and a per-identity
//! grouping for consensus verification. Every mutation updates both.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{SampleRecord, StorageKey};

#[derive(Debug, Clone, Default)]
pub struct GalleryIndex {
    samples: Vec<Arc<SampleRecord>>,
    by_identity: HashMap<String, Vec<Arc<SampleRecord>>>,
}

impl GalleryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = SampleRecord>) -> Self {
        let mut index = Self::new();
        index.rebuild(records);
        index
    }

    /// Replace both views with `records`, keeping their order.
    pub fn rebuild(&mut self, records: impl IntoIterator<Item = SampleRecord>) {
        self.samples.clear();
        self.by_identity.clear();
        for record in records {
            self.insert(record);
        }
    }

    pub fn insert(&mut self, record: SampleRecord) {
        let record = Arc::new(record);
        self.by_identity
            .entry(record.identity.clone())
            .or_default()
            .push(Arc::clone(&record));
        self.samples.push(record);
    }

    /// Remove one sample by key. Returns false if the key is not indexed.
    /// An identity whose last sample is removed disappears from the index.
    pub fn remove(&mut self, key: &StorageKey) -> bool {
        let Some(pos) = self.samples.iter().position(|s| &s.key == key) else {
            return false;
        };
        let removed = self.samples.remove(pos);

        if let Some(group) = self.by_identity.get_mut(&removed.identity) {
            group.retain(|s| &s.key != key);
            if group.is_empty() {
                self.by_identity.remove(&removed.identity);
            }
        }
        true
    }

    /// All samples in insertion order.
    pub fn all_embeddings(&self) -> &[Arc<SampleRecord>] {
        &self.samples
    }

    /// Samples of one identity in insertion order; empty if unknown.
    pub fn embeddings_for(&self, identity: &str) -> &[Arc<SampleRecord>] {
        self.by_identity
            .get(identity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn identity_count(&self) -> usize {
        self.by_identity.len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn samples_for_count(&self, identity: &str) -> usize {
        self.embeddings_for(identity).len()
    }

    pub fn identities(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_identity
            .iter()
            .map(|(name, group)| (name.as_str(), group.len()))
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.samples.iter().any(|s| &s.key == key)
    }

    /// Embedding dimension of the gallery, taken from the first sample.
    pub fn dimension(&self) -> Option<usize> {
        self.samples.first().map(|s| s.embedding.dim())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
