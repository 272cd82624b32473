//! Error taxonomy for the indexer.
//!
//! Variants fall into three groups: data-quality problems that are logged and
//! skipped, transient infrastructure failures that drop one batch, and fatal
//! errors that abort the run and roll back the generation being built.

use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum IndexerError {
    // -- data quality ------------------------------------------------------------------------
    #[error("lifecourse {life_course_id} references unknown link id '{link_id}'")]
    DanglingLink { life_course_id: u64, link_id: String },

    #[error("appearance {pa_key} has no standardized counterpart")]
    UnmatchedAppearance { pa_key: String },

    #[error("malformed record in {context}: {reason}")]
    MalformedRecord {
        context: Cow<'static, str>,
        reason: String,
    },

    #[error("link '{link_id}' connects no appearances")]
    EmptyLink { link_id: String },

    // -- transient ---------------------------------------------------------------------------
    #[error("bulk request against '{index}' failed: {reason}")]
    Bulk { index: String, reason: String },

    #[error("request against '{index}' timed out")]
    Timeout { index: String },

    // -- fatal -------------------------------------------------------------------------------
    #[error("search engine unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("configuration error: {0}")]
    Config(Cow<'static, str>),

    #[error("required file is missing: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("index lifecycle error: {0}")]
    Lifecycle(String),

    #[error("relational store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IndexerError {
    /// Whether this error must abort the run instead of dropping a record or batch.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::DanglingLink { .. }
                | Self::UnmatchedAppearance { .. }
                | Self::MalformedRecord { .. }
                | Self::EmptyLink { .. }
                | Self::Bulk { .. }
                | Self::Timeout { .. }
        )
    }

    pub(crate) fn malformed(context: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            context: Cow::Borrowed(context),
            reason: reason.into(),
        }
    }

    /// Map a transport error into the taxonomy. Connection failures are fatal; a timed out
    /// request only costs the batch it carried.
    pub(crate) fn from_http(index: &str, err: &reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unreachable {
                reason: err.to_string(),
            }
        } else if err.is_timeout() {
            Self::Timeout {
                index: index.to_string(),
            }
        } else {
            Self::Http(err.to_string())
        }
    }
}
