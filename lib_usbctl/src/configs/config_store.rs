//! # Config Store
//!
//! Single owner of the persisted [`ConfigRecord`]. Writes are serialized by
//! an async mutex and land on disk through a temp file in the same directory
//! followed by an atomic rename, so a crash mid-write leaves the previous
//! file intact.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::ConfigError;

use super::config_file::ConfigRecord;

pub struct ConfigStore {
    path: PathBuf,
    record: Mutex<ConfigRecord>,
}

impl ConfigStore {
    /// Opens the store at `path`, loading whatever is persisted there.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let record = Self::load(&path).await?;
        Ok(Self::with_record(path, record))
    }

    /// Store whose in-memory record starts as `record`; nothing is read.
    pub fn with_record(path: impl Into<PathBuf>, record: ConfigRecord) -> Self {
        Self {
            path: path.into(),
            record: Mutex::new(record),
        }
    }

    /// Reads and parses `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<ConfigRecord, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let record = ConfigRecord::parse(&text);
                debug!(
                    path = %path.display(),
                    bound = record.bound_devices.len(),
                    "loaded config"
                );
                Ok(record)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(ConfigRecord::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the last persisted (or initial) record.
    pub async fn record(&self) -> ConfigRecord {
        self.record.lock().await.clone()
    }

    pub async fn save(&self, record: ConfigRecord) -> Result<(), ConfigError> {
        let mut current = self.record.lock().await;
        self.write(&record).await?;
        *current = record;
        Ok(())
    }

    /// Applies `change` to a copy of the current record and persists it. The
    /// in-memory record only moves forward once the write succeeded.
    pub async fn update<F>(&self, change: F) -> Result<ConfigRecord, ConfigError>
    where
        F: FnOnce(&mut ConfigRecord),
    {
        let mut current = self.record.lock().await;
        let mut next = current.clone();
        change(&mut next);
        self.write(&next).await?;
        *current = next.clone();
        Ok(next)
    }

    async fn write(&self, record: &ConfigRecord) -> Result<(), ConfigError> {
        let path = self.path.clone();
        let contents = record.render();
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&target, &contents))
            .await
            .map_err(|e| ConfigError::Task(e.to_string()))?
            .map_err(|source| ConfigError::Persist {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), bound = record.bound_devices.len(), "persisted config");
        Ok(())
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").field("path", &self.path).finish_non_exhaustive()
    }
}

fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    // Dropped without persist() on any error below, which removes the temp file.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
