//! Source metadata: one row per raw dataset.

use serde::{Deserialize, Serialize};

/// Dataset family. Each family merges standardized and transcribed rows differently.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    Census,
    BurialProtocol,
    ParishRegister,
    #[default]
    Other,
}

impl SourceFamily {
    /// Classify a free-form `source_type` cell.
    #[must_use]
    pub fn from_source_type(source_type: &str) -> Self {
        let normalized = source_type.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "census" | "ft" => Self::Census,
            "burial_protocol" | "burial protocol" | "cbp" => Self::BurialProtocol,
            "parish_register" | "parish register" | "pr" => Self::ParishRegister,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Census => "census",
            Self::BurialProtocol => "burial_protocol",
            Self::ParishRegister => "parish_register",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Source {
    pub source_id: u32,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub source_year: Option<i32>,
    #[serde(default)]
    pub event_type: String,
    /// Standardized file, relative to the dataset root.
    #[serde(default)]
    pub file_reference: String,
    /// Transcribed file, relative to the transcribed root.
    #[serde(default)]
    pub original_data_reference: String,
}

impl Source {
    #[must_use]
    pub fn family(&self) -> SourceFamily {
        SourceFamily::from_source_type(&self.source_type)
    }

    /// Identity key of an appearance of this source.
    #[must_use]
    pub fn pa_key(&self, pa_id: u64) -> String {
        pa_key(self.source_id, pa_id)
    }
}

/// `{source_id}-{pa_id}`, the identity of one person appearance.
#[must_use]
pub fn pa_key(source_id: u32, pa_id: u64) -> String {
    format!("{source_id}-{pa_id}")
}
