//! Schema-flexible rows for files whose columns vary per dataset family.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row as a mapping of column name to a loosely typed value.
///
/// Cells are kept as their original text and only parsed by the typed accessors, so codes with
/// leading zeros and ids wider than 64 bits publish unchanged. Empty cells are not stored, so a
/// lookup of an empty column behaves like a missing column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a header row and a data row; surplus cells are dropped and missing
    /// cells are absent.
    pub fn from_row<'a, H, C>(headers: H, cells: C) -> Self
    where
        H: IntoIterator<Item = &'a str>,
        C: IntoIterator<Item = &'a str>,
    {
        let mut fields = BTreeMap::new();
        for (header, cell) in headers.into_iter().zip(cells) {
            if !cell.trim().is_empty() {
                fields.insert(header.trim().to_string(), Value::String(cell.to_string()));
            }
        }
        Self(fields)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Case-insensitive lookup; exact matches win.
    #[must_use]
    pub fn get_ignore_case(&self, key: &str) -> Option<&Value> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
    }

    /// Integer lookup accepting numbers and numeric strings.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get_ignore_case(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_ignore_case(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}
