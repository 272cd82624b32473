//! Person appearances: standardized rows, transcribed rows and the merged document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::Record;
use super::source::{SourceFamily, pa_key};
use crate::error::{IndexerError, Result};

/// One standardized person-appearance row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StandardPa {
    pub pa_id: u64,
    #[serde(default)]
    pub source_id: u32,
    #[serde(default)]
    pub name_cl: String,
    #[serde(default)]
    pub first_names: String,
    #[serde(default)]
    pub patronyms: String,
    #[serde(default)]
    pub family_names: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub age: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub birth_year: Option<i32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub death_year: Option<i32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub event_year: Option<i32>,
    #[serde(default)]
    pub birth_place: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub event_type: String,
}

/// Typed view over a transcribed row. The transcription keeps every column of the source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscribedPa {
    pub pa_id: u64,
    pub source_id: u32,
    pub key: String,
    pub transcription: BTreeMap<String, Value>,
}

impl TranscribedPa {
    /// Build the typed view from a schema-flexible row. Fails when the row carries no usable
    /// `pa_id`.
    pub fn from_record(record: Record, source_id: u32) -> Result<Self> {
        let pa_id = record.get_u64("pa_id").ok_or_else(|| {
            let raw = record
                .get_ignore_case("pa_id")
                .map_or_else(|| "<missing>".to_string(), ToString::to_string);
            IndexerError::malformed(
                "transcribed row",
                format!("source {source_id}: unusable pa_id {raw}"),
            )
        })?;
        Ok(Self {
            pa_id,
            source_id,
            key: pa_key(source_id, pa_id),
            transcription: record.into_inner(),
        })
    }
}

/// A standardized row merged with its transcription, as published to the appearance index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasePa {
    pub key: String,
    pub pa_id: u64,
    pub source_id: u32,
    pub family: SourceFamily,
    pub standard: StandardPa,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcribed: Option<BTreeMap<String, Value>>,
    pub first_name_sortable: Option<String>,
    pub last_name_sortable: Option<String>,
    pub birth_year_sortable: Option<i32>,
    pub death_year_sortable: Option<i32>,
    pub event_year_sortable: Option<i32>,
    pub source_year_searchable: Option<i32>,
    #[serde(default)]
    pub data_version: String,
}
