use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use likeness_core::vision::{PIXEL_EMBEDDER_MAX_SIZE, PIXEL_EMBEDDER_MIN_SIZE};
use likeness_core::{EmbeddingStore, FileStore, MatcherConfig, SqliteStore, StoreError};
use serde::Deserialize;

/// Storage backend for enrolled samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per sample under `<data_dir>/samples`.
    File,
    /// SQLite database at `<data_dir>/samples.db`.
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => bail!("unknown store backend {other:?} (expected \"file\" or \"sqlite\")"),
        }
    }
}

/// Which D-Bus bus to serve on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            other => bail!("unknown bus {other:?} (expected \"session\" or \"system\")"),
        }
    }
}

/// Daemon configuration: defaults, then an optional TOML file named by
/// `LIKENESS_CONFIG`, then `LIKENESS_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the sample store.
    pub data_dir: PathBuf,
    pub store: StoreBackend,
    pub bus: BusKind,
    /// Side length of the pixel embedder's resized face crop.
    pub embedding_size: u32,
    pub matcher: MatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store: StoreBackend::File,
            bus: BusKind::Session,
            embedding_size: 100,
            matcher: MatcherConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("LIKENESS_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the daemon cannot start with.
    pub fn validate(&self) -> Result<()> {
        let range = PIXEL_EMBEDDER_MIN_SIZE..=PIXEL_EMBEDDER_MAX_SIZE;
        if !range.contains(&self.embedding_size) {
            bail!(
                "embedding_size {} out of range {}..={}",
                self.embedding_size,
                PIXEL_EMBEDDER_MIN_SIZE,
                PIXEL_EMBEDDER_MAX_SIZE
            );
        }
        self.matcher.validate()?;
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `LIKENESS_*` overrides read through `get`.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = get("LIKENESS_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(store) = get("LIKENESS_STORE") {
            self.store = store.parse()?;
        }
        if let Some(bus) = get("LIKENESS_BUS") {
            self.bus = bus.parse()?;
        }
        override_num(&get, "LIKENESS_EMBEDDING_SIZE", &mut self.embedding_size)?;
        override_num(&get, "LIKENESS_TOLERANCE", &mut self.matcher.tolerance)?;
        override_num(&get, "LIKENESS_CONFIDENCE_THRESHOLD", &mut self.matcher.confidence_threshold)?;
        override_num(&get, "LIKENESS_CONSENSUS_MATCH_RATE", &mut self.matcher.consensus_match_rate)?;
        override_num(&get, "LIKENESS_CERTAINTY_DISTANCE", &mut self.matcher.certainty_distance)?;
        Ok(())
    }

    /// Open the configured store.
    pub fn open_store(&self) -> Result<Box<dyn EmbeddingStore>, StoreError> {
        Ok(match self.store {
            StoreBackend::File => Box::new(FileStore::open(self.data_dir.join("samples"))?),
            StoreBackend::Sqlite => Box::new(SqliteStore::open(self.data_dir.join("samples.db"))?),
        })
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
}

fn override_num<T>(get: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}"))?;
    }
    Ok(())
}
