//! Run-scoped configuration.
//!
//! One `RunConfig` is built per run and passed by reference into every stage that needs it.
//! The data version in particular is never held in process-wide state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_FLUSH_INTERVAL, DEFAULT_SNAPSHOT_REPOSITORY,
};
use crate::error::{IndexerError, Result};

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Where to snapshot the published indices once they are active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub repository: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root of the linked dataset (lifecourses, links, sources, standardized files).
    pub dataset_root: PathBuf,
    /// Root of the transcribed source files.
    pub transcribed_root: PathBuf,
    /// Tag stamped on every persisted record of this run.
    #[serde(default)]
    pub data_version: Option<String>,
    /// Cap on lifecourse rows read; 0 reads everything.
    #[serde(default)]
    pub max_entries: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval: Duration,
    /// Worker threads used for per-source publication.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub skip_db: bool,
    #[serde(default)]
    pub skip_pas: bool,
    #[serde(default)]
    pub snapshot: Option<SnapshotConfig>,
}

impl RunConfig {
    #[must_use]
    pub fn builder(dataset_root: impl Into<PathBuf>) -> RunConfigBuilder {
        RunConfigBuilder {
            inner: Self {
                dataset_root: dataset_root.into(),
                transcribed_root: PathBuf::new(),
                data_version: None,
                max_entries: 0,
                batch_size: DEFAULT_BATCH_SIZE,
                flush_interval: DEFAULT_FLUSH_INTERVAL,
                concurrency: DEFAULT_CONCURRENCY,
                skip_db: false,
                skip_pas: false,
                snapshot: None,
            },
        }
    }

    /// Check the settings a run cannot start without and return the data version.
    pub fn validate(&self) -> Result<&str> {
        let version = self
            .data_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| IndexerError::Config("data version is not set; cannot continue".into()))?;
        self.check_limits()?;
        Ok(version)
    }

    /// Check batching, workers and the dataset root; everything except the data version.
    pub fn check_limits(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(IndexerError::Config("concurrency must be positive".into()));
        }
        if !self.dataset_root.is_dir() {
            return Err(IndexerError::MissingFile {
                path: self.dataset_root.clone(),
            });
        }
        Ok(())
    }

    /// A bounded run caps the lifecourses read and filters appearances to the ones they use.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.max_entries > 0
    }

    #[must_use]
    pub fn dataset_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.dataset_root.join(relative)
    }

    #[must_use]
    pub fn transcribed_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.transcribed_root.join(relative)
    }
}

#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    inner: RunConfig,
}

impl RunConfigBuilder {
    #[must_use]
    pub fn transcribed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.inner.transcribed_root = root.into();
        self
    }

    #[must_use]
    pub fn data_version(mut self, version: impl Into<String>) -> Self {
        self.inner.data_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.inner.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.inner.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.inner.flush_interval = interval;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.inner.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn skip_db(mut self, skip: bool) -> Self {
        self.inner.skip_db = skip;
        self
    }

    #[must_use]
    pub fn skip_pas(mut self, skip: bool) -> Self {
        self.inner.skip_pas = skip;
        self
    }

    #[must_use]
    pub fn snapshot(mut self, repository: Option<String>, bucket: impl Into<String>) -> Self {
        self.inner.snapshot = Some(SnapshotConfig {
            repository: repository.unwrap_or_else(|| DEFAULT_SNAPSHOT_REPOSITORY.to_string()),
            bucket: bucket.into(),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> RunConfig {
        self.inner
    }
}
