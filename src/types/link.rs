use serde::{Deserialize, Serialize};

use super::source::pa_key;
use crate::error::{IndexerError, Result};

/// A link row connecting person appearances. Raw and canonical links share this type; a
/// canonical link's `link_id` holds the comma-joined ids of every raw row it absorbed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Link {
    pub link_id: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub source_id1: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub pa_id1: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub source_id2: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub pa_id2: Option<u64>,
    #[serde(default)]
    pub method_id: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub score: Option<f64>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub data_version: Option<String>,
}

impl Link {
    /// Appearance keys this link connects, in row order.
    #[must_use]
    pub fn pa_keys(&self) -> Vec<String> {
        [
            (self.source_id1, self.pa_id1),
            (self.source_id2, self.pa_id2),
        ]
        .into_iter()
        .filter_map(|pair| match pair {
            (Some(source_id), Some(pa_id)) => Some(pa_key(source_id, pa_id)),
            _ => None,
        })
        .collect()
    }

    /// Compute the canonical key from the connected appearances.
    pub fn init_key(&mut self) -> Result<()> {
        let keys = self.pa_keys();
        if keys.is_empty() {
            return Err(IndexerError::EmptyLink {
                link_id: self.link_id.clone(),
            });
        }
        self.key = canonical_link_key(keys);
        Ok(())
    }

    /// Raw link ids merged into this link.
    pub fn raw_ids(&self) -> impl Iterator<Item = &str> {
        split_ids(&self.link_id)
    }
}

/// Order-independent identity of a set of appearance keys.
#[must_use]
pub fn canonical_link_key<I, S>(keys: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    keys.sort_unstable();
    keys.dedup();
    keys.join("_")
}

/// Split a comma-separated id list, ignoring blanks.
pub fn split_ids(ids: &str) -> impl Iterator<Item = &str> {
    ids.split(',').map(str::trim).filter(|id| !id.is_empty())
}
