//! Reverse index from appearance key to the lifecourses that reference it.
//!
//! Built once from the fully assembled lifecourse list and never mutated afterwards; the
//! per-source workers share it read-only. Appearances published later, from any source, are
//! routed to their lifecourse documents through this map.

use std::collections::{HashMap, HashSet};

use crate::error::{IndexerError, Result};
use crate::types::{BasePa, LifeCourse};

#[derive(Debug, Clone, Default)]
pub struct ReverseIndex {
    owners: HashMap<String, Vec<String>>,
    lifecourses: usize,
}

impl ReverseIndex {
    /// Build from a materialized lifecourse slice. Taking a slice rather than a stream means
    /// assembly has drained before anything can be routed.
    #[must_use]
    pub fn build(lifecourses: &[LifeCourse]) -> Self {
        let mut owners: HashMap<String, Vec<String>> = HashMap::new();
        for lifecourse in lifecourses {
            for pa_key in lifecourse.pa_keys() {
                owners
                    .entry(pa_key)
                    .or_default()
                    .push(lifecourse.key.clone());
            }
        }
        let lifecourses = owners
            .values()
            .flatten()
            .map(String::as_str)
            .collect::<HashSet<_>>()
            .len();
        Self {
            owners,
            lifecourses,
        }
    }

    /// Check that every appearance of every lifecourse routes back to that lifecourse. Run
    /// before any appearance is published; a gap here means updates would be lost silently.
    pub fn verify(&self, lifecourses: &[LifeCourse]) -> Result<()> {
        for lifecourse in lifecourses {
            let pa_keys = lifecourse.pa_keys();
            if pa_keys.is_empty() {
                return Err(IndexerError::Lifecycle(format!(
                    "lifecourse {} has no appearances to route",
                    lifecourse.life_course_id
                )));
            }
            for pa_key in pa_keys {
                if !self.lifecourses_for(&pa_key).contains(&lifecourse.key) {
                    return Err(IndexerError::Lifecycle(format!(
                        "reverse index does not route {pa_key} to lifecourse {}",
                        lifecourse.life_course_id
                    )));
                }
            }
        }
        if self.lifecourses != lifecourses.len() {
            return Err(IndexerError::Lifecycle(format!(
                "reverse index owns {} lifecourses, expected {}",
                self.lifecourses,
                lifecourses.len()
            )));
        }
        Ok(())
    }

    /// Lifecourse keys referencing `pa_key`; empty when none do.
    #[must_use]
    pub fn lifecourses_for(&self, pa_key: &str) -> &[String] {
        self.owners.get(pa_key).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, pa_key: &str) -> bool {
        self.owners.contains_key(pa_key)
    }

    /// Number of distinct appearance keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Number of distinct lifecourses owning at least one appearance.
    #[must_use]
    pub fn lifecourse_count(&self) -> usize {
        self.lifecourses
    }

    /// Pair each appearance with every lifecourse that owns it.
    #[must_use]
    pub fn updates_for<'p>(&self, appearances: &'p [BasePa]) -> Vec<(String, &'p BasePa)> {
        appearances
            .iter()
            .flat_map(|pa| {
                self.lifecourses_for(&pa.key)
                    .iter()
                    .map(move |lifecourse| (lifecourse.clone(), pa))
            })
            .collect()
    }
}
