//! SQLite-backed store: one row per sample, embedding as a little-endian f32 blob.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use rusqlite::{params, Connection};

use super::{is_well_formed_key, new_storage_key, sort_records, EmbeddingStore, StoreError};
use crate::types::{Embedding, SampleRecord, StorageKey};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS samples (
    key           TEXT PRIMARY KEY,
    identity      TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS samples_identity ON samples(identity);
";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Create the database file and schema if they do not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { path };
        store.connect()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(at.nanosecond() / 1_000 * 1_000).unwrap_or(at)
}

fn encode_values(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_values(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Raw row before validation.
struct SampleRow {
    key: String,
    identity: String,
    embedding: Vec<u8>,
    model_version: Option<String>,
    created_at: String,
}

impl SampleRow {
    fn into_record(self) -> Result<SampleRecord, String> {
        let values = decode_values(&self.embedding)
            .ok_or_else(|| format!("embedding blob of {} bytes", self.embedding.len()))?;
        if !values.iter().all(|v| v.is_finite()) {
            return Err("embedding contains non-finite values".to_string());
        }
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| format!("created_at {:?}: {e}", self.created_at))?
            .with_timezone(&Utc);
        Ok(SampleRecord {
            key: StorageKey::new(self.key),
            identity: self.identity,
            embedding: Embedding {
                values,
                model_version: self.model_version,
            },
            created_at,
        })
    }
}

impl EmbeddingStore for SqliteStore {
    fn persist(&self, identity: &str, embedding: &Embedding) -> Result<SampleRecord, StoreError> {
        if !embedding.is_finite() {
            return Err(StoreError::NonFinite);
        }
        // Stored at microsecond precision; keep the returned record identical
        // to what a later load produces.
        let created_at = truncate_to_micros(Utc::now());
        let key = new_storage_key(identity, created_at);

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO samples (key, identity, embedding, model_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.as_str(),
                identity,
                encode_values(&embedding.values),
                embedding.model_version,
                created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;

        tracing::debug!(key = %key, db = %self.path.display(), "sample inserted");

        Ok(SampleRecord {
            key,
            identity: identity.to_string(),
            embedding: embedding.clone(),
            created_at,
        })
    }

    fn delete(&self, key: &StorageKey) -> Result<bool, StoreError> {
        if !is_well_formed_key(key) {
            return Ok(false);
        }
        let changed = self
            .connect()?
            .execute("DELETE FROM samples WHERE key = ?1", params![key.as_str()])?;
        Ok(changed > 0)
    }

    fn load_all(&self) -> Result<Vec<SampleRecord>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT key, identity, embedding, model_version, created_at
             FROM samples ORDER BY created_at, key",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(SampleRow {
                key: r.get(0)?,
                identity: r.get(1)?,
                embedding: r.get(2)?,
                model_version: r.get(3)?,
                created_at: r.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable sample row");
                    continue;
                }
            };
            let key = row.key.clone();
            match row.into_record() {
                Ok(record) => records.push(record),
                Err(reason) => {
                    tracing::warn!(key = %key, reason = %reason, "skipping corrupt sample row")
                }
            }
        }

        sort_records(&mut records);
        Ok(records)
    }
}
