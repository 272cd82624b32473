//! Structured file reading for the dataset CSV exports.
//!
//! Rows are produced lazily so multi-gigabyte transcription files are never materialized.
//! Headers are read but not validated: unknown columns are ignored, missing columns fall back to
//! field defaults, and ragged rows are accepted.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::error::{IndexerError, Result};
use crate::types::Record;

/// A CSV file on disk.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    path: PathBuf,
    delimiter: u8,
}

impl CsvDataset {
    /// Point at a file that must exist; absence is fatal for the run.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(IndexerError::MissingFile { path });
        }
        Ok(Self {
            path,
            delimiter: b',',
        })
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<csv::Reader<File>> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .delimiter(self.delimiter)
            .from_path(&self.path)?;
        Ok(reader)
    }

    /// Typed rows, deserialized by column name.
    pub fn read<T: DeserializeOwned>(&self) -> Result<TypedRows<T>> {
        Ok(TypedRows {
            inner: self.reader()?.into_deserialize(),
            path: self.path.clone(),
        })
    }

    /// Schema-flexible rows for files whose columns vary.
    pub fn records(&self) -> Result<RecordRows> {
        let mut reader = self.reader()?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        Ok(RecordRows {
            headers,
            inner: reader.into_records(),
        })
    }
}

/// Lazy iterator over typed rows.
pub struct TypedRows<T> {
    inner: csv::DeserializeRecordsIntoIter<File, T>,
    path: PathBuf,
}

impl<T: DeserializeOwned> TypedRows<T> {
    /// Drop rows that fail to deserialize, logging each one.
    pub fn tolerant(self) -> impl Iterator<Item = T> {
        let path = self.path.clone();
        self.filter_map(move |row| match row {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    target = "lifecourse::reader",
                    path = %path.display(),
                    error = %err,
                    "skipping unreadable row"
                );
                None
            }
        })
    }
}

impl<T: DeserializeOwned> Iterator for TypedRows<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|row| row.map_err(IndexerError::from))
    }
}

/// Lazy iterator over [`Record`] rows.
pub struct RecordRows {
    headers: Vec<String>,
    inner: csv::StringRecordsIntoIter<File>,
}

impl RecordRows {
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for RecordRows {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.inner.next()?;
        Some(
            row.map(|cells| Record::from_row(self.headers.iter().map(String::as_str), cells.iter()))
                .map_err(IndexerError::from),
        )
    }
}
