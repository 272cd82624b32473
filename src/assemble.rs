//! Lifecourse assembly.
//!
//! Each lifecourse row lists raw link ids. Every id is resolved against the canonical link
//! mapping; a row with any unresolved id is excluded from publication and logged. Surviving
//! lifecourses get their identity key and the run's data version, then duplicates by key are
//! collapsed keeping the first occurrence.

use std::collections::{HashMap, HashSet, hash_map::Entry};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{IndexerError, Result};
use crate::links::{CanonicalLinks, dedup_links, read_referenced_links};
use crate::reader::CsvDataset;
use crate::types::{LifeCourse, LifeCourseRow, Link};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Rows consumed from the lifecourse file (after the row cap).
    pub read: usize,
    /// Rows excluded for referencing a link id with no canonical link.
    pub dangling: usize,
    /// Rows excluded for listing no link ids at all.
    pub empty: usize,
    /// Assembled lifecourses discarded because an earlier one had the same key.
    pub duplicates: usize,
}

/// The fully drained output of the assembly stage.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub lifecourses: Vec<LifeCourse>,
    pub stats: AssemblyStats,
}

#[derive(Debug, Clone, Copy)]
pub struct LifecourseAssembler<'a> {
    data_version: &'a str,
    max_entries: usize,
}

impl<'a> LifecourseAssembler<'a> {
    /// `max_entries` caps the rows read; 0 reads everything.
    #[must_use]
    pub fn new(data_version: &'a str, max_entries: usize) -> Self {
        Self {
            data_version,
            max_entries,
        }
    }

    /// Read lifecourse rows, applying the row cap before anything is resolved.
    pub fn read_rows(&self, dataset: &CsvDataset) -> Result<Vec<LifeCourseRow>> {
        let rows = dataset.read::<LifeCourseRow>()?.tolerant();
        Ok(if self.max_entries == 0 {
            rows.collect()
        } else {
            rows.take(self.max_entries).collect()
        })
    }

    /// Whole stage from files: rows, referenced links, dedup, resolution, key dedup.
    pub fn assemble_files(
        &self,
        lifecourses: &CsvDataset,
        links: &CsvDataset,
    ) -> Result<(Assembly, CanonicalLinks)> {
        let started = Instant::now();
        let rows = self.read_rows(lifecourses)?;
        let referenced = referenced_link_ids(&rows);
        tracing::info!(
            target = "lifecourse::assemble",
            rows = rows.len(),
            referenced_links = referenced.len(),
            "read lifecourse rows"
        );

        let raw_links = read_referenced_links(links, &referenced, self.data_version)?;
        let dedup_started = Instant::now();
        let canonical = dedup_links(raw_links);
        let dedup = canonical.stats();
        tracing::info!(
            target = "lifecourse::assemble",
            raw = dedup.raw,
            canonical = dedup.canonical,
            skipped = dedup.skipped,
            elapsed_ms = dedup_started.elapsed().as_millis() as u64,
            "deduplicated links"
        );

        let assembly = self.assemble(rows, &canonical);
        tracing::info!(
            target = "lifecourse::assemble",
            assembled = assembly.lifecourses.len(),
            dangling = assembly.stats.dangling,
            empty = assembly.stats.empty,
            duplicates = assembly.stats.duplicates,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assembled lifecourses"
        );
        Ok((assembly, canonical))
    }

    /// Resolve rows against canonical links and collapse duplicate keys.
    pub fn assemble<I>(&self, rows: I, links: &CanonicalLinks) -> Assembly
    where
        I: IntoIterator<Item = LifeCourseRow>,
    {
        let mut stats = AssemblyStats::default();
        let mut resolved = Vec::new();
        for row in rows {
            stats.read += 1;
            match self.resolve(row, links) {
                Ok(lifecourse) => resolved.push(lifecourse),
                Err(err @ IndexerError::DanglingLink { .. }) => {
                    stats.dangling += 1;
                    tracing::warn!(target = "lifecourse::assemble", error = %err, "excluding lifecourse");
                }
                Err(err) => {
                    stats.empty += 1;
                    tracing::warn!(target = "lifecourse::assemble", error = %err, "excluding lifecourse");
                }
            }
        }
        let (lifecourses, duplicates) = dedup_by_key(resolved);
        stats.duplicates = duplicates;
        if duplicates > 0 {
            tracing::info!(
                target = "lifecourse::assemble",
                discarded = duplicates,
                "discarded lifecourses with duplicate keys"
            );
        }
        Assembly { lifecourses, stats }
    }

    /// Resolve one row. Fails on the first link id without a canonical link.
    pub fn resolve(&self, row: LifeCourseRow, links: &CanonicalLinks) -> Result<LifeCourse> {
        let mut resolved: Vec<Arc<Link>> = Vec::new();
        for id in row.link_ids() {
            let link = links.get(id).ok_or_else(|| IndexerError::DanglingLink {
                life_course_id: row.life_course_id,
                link_id: id.to_string(),
            })?;
            resolved.push(Arc::clone(link));
        }
        if resolved.is_empty() {
            return Err(IndexerError::malformed(
                "lifecourse row",
                format!("lifecourse {} lists no link ids", row.life_course_id),
            ));
        }
        Ok(LifeCourse::new(row, resolved, self.data_version))
    }
}

/// Every raw link id mentioned by `rows`.
#[must_use]
pub fn referenced_link_ids(rows: &[LifeCourseRow]) -> HashSet<String> {
    rows.iter()
        .flat_map(LifeCourseRow::link_ids)
        .map(str::to_string)
        .collect()
}

/// Keep the first lifecourse per key, in input order. Returns the survivors and how many were
/// discarded.
#[must_use]
pub fn dedup_by_key(lifecourses: Vec<LifeCourse>) -> (Vec<LifeCourse>, usize) {
    let before = lifecourses.len();
    let mut seen: HashMap<String, u64> = HashMap::with_capacity(before);
    let mut kept = Vec::with_capacity(before);
    for lifecourse in lifecourses {
        match seen.entry(lifecourse.key.clone()) {
            Entry::Occupied(first) => {
                tracing::debug!(
                    target = "lifecourse::assemble",
                    key = %lifecourse.key,
                    kept = *first.get(),
                    discarded = lifecourse.life_course_id,
                    "duplicate lifecourse key"
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(lifecourse.life_course_id);
                kept.push(lifecourse);
            }
        }
    }
    let discarded = before - kept.len();
    (kept, discarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: &str, a: (u32, u64), b: (u32, u64)) -> Link {
        Link {
            link_id: id.to_string(),
            source_id1: Some(a.0),
            pa_id1: Some(a.1),
            source_id2: Some(b.0),
            pa_id2: Some(b.1),
            ..Link::default()
        }
    }

    fn row(id: u64, link_ids: &str) -> LifeCourseRow {
        LifeCourseRow {
            life_course_id: id,
            link_ids: link_ids.to_string(),
        }
    }

    fn canonical() -> CanonicalLinks {
        dedup_links(vec![
            link("1", (1, 10), (2, 20)),
            link("2", (2, 20), (3, 30)),
            link("3", (2, 20), (1, 10)),
            link("4", (4, 40), (5, 50)),
        ])
    }

    #[test]
    fn dangling_reference_excludes_lifecourse() {
        let assembler = LifecourseAssembler::new("1.0", 0);
        let assembly = assembler.assemble(vec![row(1, "1,2"), row(2, "4,404")], &canonical());
        assert_eq!(assembly.lifecourses.len(), 1);
        assert_eq!(assembly.lifecourses[0].life_course_id, 1);
        assert_eq!(assembly.stats.dangling, 1);
        assert!(
            assembly
                .lifecourses
                .iter()
                .all(|lc| lc.life_course_id != 2)
        );
    }

    #[test]
    fn resolve_reports_unresolved_id() {
        let assembler = LifecourseAssembler::new("1.0", 0);
        let err = assembler
            .resolve(row(7, "1,missing"), &canonical())
            .expect_err("dangling");
        match err {
            IndexerError::DanglingLink {
                life_course_id,
                link_id,
            } => {
                assert_eq!(life_course_id, 7);
                assert_eq!(link_id, "missing");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn keys_are_unique_and_first_wins() {
        let assembler = LifecourseAssembler::new("1.0", 0);
        // Rows 1 and 2 resolve to the same appearance set through duplicate links 1 and 3.
        let assembly = assembler.assemble(
            vec![row(1, "1,2"), row(2, "3,2"), row(3, "4")],
            &canonical(),
        );
        assert_eq!(assembly.stats.duplicates, 1);
        let ids: Vec<u64> = assembly.lifecourses.iter().map(|lc| lc.life_course_id).collect();
        assert_eq!(ids, vec![1, 3]);
        let keys: HashSet<&str> = assembly.lifecourses.iter().map(|lc| lc.key.as_str()).collect();
        assert_eq!(keys.len(), assembly.lifecourses.len());
    }

    #[test]
    fn lifecourses_carry_data_version() {
        let assembler = LifecourseAssembler::new("2.1", 0);
        let assembly = assembler.assemble(vec![row(1, "4")], &canonical());
        assert_eq!(assembly.lifecourses[0].data_version, "2.1");
    }

    #[test]
    fn empty_link_list_is_excluded() {
        let assembler = LifecourseAssembler::new("1.0", 0);
        let assembly = assembler.assemble(vec![row(1, ""), row(2, "4")], &canonical());
        assert_eq!(assembly.lifecourses.len(), 1);
        assert_eq!(assembly.stats.empty, 1);
        assert_eq!(assembly.stats.dangling, 0);
    }

    #[test]
    fn referenced_ids_cover_all_rows() {
        let ids = referenced_link_ids(&[row(1, "1,2"), row(2, "2,5")]);
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("5"));
    }
}
