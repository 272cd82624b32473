use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::link::{Link, split_ids};

/// A lifecourse row as exported, before its link ids are resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LifeCourseRow {
    pub life_course_id: u64,
    #[serde(default)]
    pub link_ids: String,
}

impl LifeCourseRow {
    pub fn link_ids(&self) -> impl Iterator<Item = &str> {
        split_ids(&self.link_ids)
    }
}

/// An assembled lifecourse. Published once as a baseline document with an empty appearance
/// collection and null summary fields; the index copy is then patched as appearances arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifeCourse {
    pub life_course_id: u64,
    pub link_ids: String,
    pub links: Vec<Arc<Link>>,
    pub key: String,
    pub data_version: String,
    #[serde(default)]
    pub person_appearance: Vec<Value>,
    #[serde(default)]
    pub first_name_sortable: Option<String>,
    #[serde(default)]
    pub last_name_sortable: Option<String>,
    #[serde(default)]
    pub birth_year_sortable: Option<i32>,
    #[serde(default)]
    pub death_year_sortable: Option<i32>,
    #[serde(default)]
    pub event_year_sortable: Option<i32>,
    #[serde(default)]
    pub source_year_searchable: Option<i32>,
}

impl LifeCourse {
    #[must_use]
    pub fn new(row: LifeCourseRow, links: Vec<Arc<Link>>, data_version: &str) -> Self {
        let key = lifecourse_key(&links);
        Self {
            life_course_id: row.life_course_id,
            link_ids: row.link_ids,
            links,
            key,
            data_version: data_version.to_string(),
            person_appearance: Vec::new(),
            first_name_sortable: None,
            last_name_sortable: None,
            birth_year_sortable: None,
            death_year_sortable: None,
            event_year_sortable: None,
            source_year_searchable: None,
        }
    }

    /// Distinct appearance keys reachable through this lifecourse's links, sorted.
    #[must_use]
    pub fn pa_keys(&self) -> BTreeSet<String> {
        self.links.iter().flat_map(|link| link.pa_keys()).collect()
    }
}

/// Identity of a lifecourse: a digest of the appearances its links connect. The storage id does
/// not take part, so two rows describing the same person collapse to one key.
#[must_use]
pub fn lifecourse_key(links: &[Arc<Link>]) -> String {
    let keys: BTreeSet<String> = links.iter().flat_map(|link| link.pa_keys()).collect();
    let mut hasher = blake3::Hasher::new();
    for key in &keys {
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
