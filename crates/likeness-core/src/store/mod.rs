//! Persistence of enrolled embeddings.
//!
//! Every operation opens what it needs and closes it before returning; no
//! file handle or database connection outlives a call.

mod file;
mod sqlite;

pub use file::FileStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Embedding, SampleRecord, StorageKey};

const SLUG_MAX_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("refusing to store embedding with non-finite values")]
    NonFinite,
}

/// Keyed storage for sample records.
pub trait EmbeddingStore: Send + Sync {
    /// Persist a new sample and return its record, including the key used
    /// later for deletion. Several samples per identity never collide.
    /// Embeddings with NaN or infinite components fail with
    /// `StoreError::NonFinite`.
    fn persist(&self, identity: &str, embedding: &Embedding) -> Result<SampleRecord, StoreError>;

    /// Delete one sample. A missing or malformed key is `Ok(false)`.
    fn delete(&self, key: &StorageKey) -> Result<bool, StoreError>;

    /// All readable samples ordered by `(created_at, key)`. Unreadable
    /// records and records with non-finite values are logged and skipped.
    fn load_all(&self) -> Result<Vec<SampleRecord>, StoreError>;
}

/// Build a key `<slug>_<unix millis>_<8 hex>` for a new sample of `identity`.
pub(crate) fn new_storage_key(identity: &str, created_at: DateTime<Utc>) -> StorageKey {
    let slug: String = identity
        .chars()
        .take(SLUG_MAX_LEN)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    StorageKey::new(format!(
        "{slug}_{}_{}",
        created_at.timestamp_millis(),
        &nonce[..8]
    ))
}

/// Keys only ever contain ASCII alphanumerics, `-` and `_`.
pub(crate) fn is_well_formed_key(key: &StorageKey) -> bool {
    let key = key.as_str();
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub(crate) fn sort_records(records: &mut [SampleRecord]) {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.key.cmp(&b.key))
    });
}
