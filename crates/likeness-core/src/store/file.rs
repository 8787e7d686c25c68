//! One JSON document per sample in a flat directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{is_well_formed_key, new_storage_key, sort_records, EmbeddingStore, StoreError};
use crate::types::{Embedding, SampleRecord, StorageKey};

const RECORD_EXT: &str = "json";

/// On-disk document. The key is the file stem, not part of the body.
#[derive(Serialize, Deserialize)]
struct FileRecord {
    identity: String,
    embedding: Embedding,
    created_at: DateTime<Utc>,
}

/// Directory-backed store.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir` for records, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &StorageKey) -> PathBuf {
        self.dir.join(format!("{key}.{RECORD_EXT}"))
    }

    fn read_record(path: &Path) -> Result<Option<SampleRecord>, StoreError> {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        let key = StorageKey::from(stem);
        if !is_well_formed_key(&key) {
            return Ok(None);
        }

        let body: FileRecord = serde_json::from_slice(&fs::read(path)?)?;
        Ok(Some(SampleRecord {
            key,
            identity: body.identity,
            embedding: body.embedding,
            created_at: body.created_at,
        }))
    }
}

impl EmbeddingStore for FileStore {
    fn persist(&self, identity: &str, embedding: &Embedding) -> Result<SampleRecord, StoreError> {
        // serde_json writes NaN and infinity as null, which would not load back.
        if !embedding.is_finite() {
            return Err(StoreError::NonFinite);
        }
        let created_at = Utc::now();
        let key = new_storage_key(identity, created_at);
        let body = FileRecord {
            identity: identity.to_string(),
            embedding: embedding.clone(),
            created_at,
        };

        // Write beside the target and rename so a reader never sees half a file.
        let path = self.record_path(&key);
        let tmp = self.dir.join(format!(".{key}.tmp"));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&serde_json::to_vec(&body)?)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        tracing::debug!(key = %key, path = %path.display(), "sample written");

        Ok(SampleRecord {
            key,
            identity: body.identity,
            embedding: body.embedding,
            created_at,
        })
    }

    fn delete(&self, key: &StorageKey) -> Result<bool, StoreError> {
        if !is_well_formed_key(key) {
            return Ok(false);
        }
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all(&self) -> Result<Vec<SampleRecord>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            match Self::read_record(&path) {
                Ok(Some(record)) if record.embedding.values.is_empty() => {
                    tracing::warn!(path = %path.display(), "skipping sample with empty embedding");
                }
                Ok(Some(record)) if !record.embedding.is_finite() => {
                    tracing::warn!(path = %path.display(), "skipping sample with non-finite values");
                }
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    tracing::warn!(path = %path.display(), "skipping file with malformed key");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt sample");
                }
            }
        }

        sort_records(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_persist_and_load() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let a = store.persist("alice", &Embedding::new(vec![1.0, 0.0])).unwrap();
        let b = store.persist("alice", &Embedding::new(vec![0.9, 0.1])).unwrap();
        assert_ne!(a.key, b.key);

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.identity == "alice"));
        assert!(all.iter().any(|r| r == &a));
        assert!(all.iter().any(|r| r == &b));
    }

    #[test]
    fn test_delete_missing_is_false() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(!store.delete(&StorageKey::from("nobody_1_00000000")).unwrap());
        assert!(!store.delete(&StorageKey::from("../outside")).unwrap());
    }

    #[test]
    fn test_delete_twice() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let rec = store.persist("bob", &Embedding::new(vec![1.0])).unwrap();
        assert!(store.delete(&rec.key).unwrap());
        assert!(!store.delete(&rec.key).unwrap());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_records_are_skipped() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.persist("carol", &Embedding::new(vec![0.5, 0.5])).unwrap();

        fs::write(dir.path().join("broken_1_00000000.json"), b"{not json").unwrap();
        fs::write(
            dir.path().join("empty_1_00000000.json"),
            br#"{"identity":"e","embedding":{"values":[],"model_version":null},"created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].identity, "carol");
    }

    #[test]
    fn test_non_finite_rejected_and_skipped() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let err = store
            .persist("dave", &Embedding::new(vec![f32::INFINITY, 1.0]))
            .unwrap_err();
        assert!(matches!(err, StoreError::NonFinite));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        // Out of f32 range: parses to infinity.
        fs::write(
            dir.path().join("huge_1_00000000.json"),
            br#"{"identity":"huge","embedding":{"values":[1e39,1.0],"model_version":null},"created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        store.persist("erin", &Embedding::new(vec![0.0, 1.0])).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].identity, "erin");
    }

    #[test]
    fn test_load_orders_by_creation_time() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for (key, ts) in [("z_2_00000000", "2024-01-02T00:00:00Z"), ("a_1_00000000", "2024-01-01T00:00:00Z")] {
            let body = format!(
                r#"{{"identity":"{key}","embedding":{{"values":[1.0],"model_version":null}},"created_at":"{ts}"}}"#
            );
            fs::write(dir.path().join(format!("{key}.json")), body).unwrap();
        }
        let keys: Vec<_> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.key.to_string())
            .collect();
        assert_eq!(keys, ["a_1_00000000", "z_2_00000000"]);
    }

    #[test]
    fn test_missing_directory_loads_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("samples")).unwrap();
        fs::remove_dir(store.dir()).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
