//! Link deduplication.
//!
//! Raw link rows may repeat the same logical link under different ids. Rows are grouped by
//! their canonical key (the unordered set of appearance keys they connect); each group becomes
//! one canonical link reachable from every raw id that mapped into it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::reader::CsvDataset;
use crate::types::Link;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub raw: usize,
    pub canonical: usize,
    pub skipped: usize,
}

/// Mapping from every raw link id to its canonical link.
#[derive(Debug, Clone, Default)]
pub struct CanonicalLinks {
    by_raw_id: HashMap<String, Arc<Link>>,
    stats: DedupStats,
}

impl CanonicalLinks {
    #[must_use]
    pub fn get(&self, raw_id: &str) -> Option<&Arc<Link>> {
        self.by_raw_id.get(raw_id)
    }

    #[must_use]
    pub fn contains(&self, raw_id: &str) -> bool {
        self.by_raw_id.contains_key(raw_id)
    }

    /// Number of raw ids known to the mapping.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_raw_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_raw_id.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// Distinct canonical links, in no particular order.
    #[must_use]
    pub fn canonical(&self) -> Vec<Arc<Link>> {
        let mut seen = HashSet::new();
        self.by_raw_id
            .values()
            .filter(|link| seen.insert(Arc::as_ptr(link)))
            .cloned()
            .collect()
    }
}

/// Collapse raw links sharing a canonical key. Within a group the first row in input order is
/// the representative; its `link_id` becomes the comma-joined ids of the whole group.
pub fn dedup_links<I>(links: I) -> CanonicalLinks
where
    I: IntoIterator<Item = Link>,
{
    let mut stats = DedupStats::default();
    let mut group_of: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Link, Vec<String>)> = Vec::new();

    for mut link in links {
        stats.raw += 1;
        if let Err(err) = link.init_key() {
            stats.skipped += 1;
            tracing::warn!(target = "lifecourse::links", error = %err, "skipping link");
            continue;
        }
        match group_of.get(&link.key) {
            Some(&idx) => groups[idx].1.push(link.link_id),
            None => {
                group_of.insert(link.key.clone(), groups.len());
                let ids = vec![link.link_id.clone()];
                groups.push((link, ids));
            }
        }
    }

    let mut by_raw_id = HashMap::new();
    for (mut representative, ids) in groups {
        representative.link_id = ids.join(",");
        let canonical = Arc::new(representative);
        for raw_id in canonical.raw_ids() {
            if by_raw_id
                .insert(raw_id.to_string(), Arc::clone(&canonical))
                .is_some()
            {
                tracing::warn!(
                    target = "lifecourse::links",
                    link_id = raw_id,
                    "raw link id appears under several keys; last group wins"
                );
            }
        }
        stats.canonical += 1;
    }

    CanonicalLinks { by_raw_id, stats }
}

/// Read the link file, keeping only links referenced by `referenced` ids, stamped with the run's
/// data version.
pub fn read_referenced_links(
    dataset: &CsvDataset,
    referenced: &HashSet<String>,
    data_version: &str,
) -> Result<Vec<Link>> {
    let started = Instant::now();
    let links: Vec<Link> = dataset
        .read::<Link>()?
        .tolerant()
        .filter(|link| referenced.contains(link.link_id.trim()))
        .map(|mut link| {
            link.data_version = Some(data_version.to_string());
            link
        })
        .collect();
    tracing::debug!(
        target = "lifecourse::links",
        path = %dataset.path().display(),
        kept = links.len(),
        referenced = referenced.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "read referenced links"
    );
    Ok(links)
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

    #[test]
    fn duplicates_collapse_and_keep_all_ids() {
        let canonical = dedup_links(vec![
            link("1", (1, 10), (2, 20)),
            link("2", (2, 20), (1, 10)),
            link("3", (3, 30), (4, 40)),
        ]);
        let a = canonical.get("1").expect("1");
        let b = canonical.get("2").expect("2");
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(a.link_id, "1,2");
        assert_eq!(canonical.get("3").expect("3").link_id, "3");
        assert_eq!(
            canonical.stats(),
            DedupStats {
                raw: 3,
                canonical: 2,
                skipped: 0
            }
        );
    }

    #[test]
    fn first_occurrence_is_representative() {
        let mut first = link("1", (1, 10), (2, 20));
        first.method_id = "first".into();
        let mut second = link("2", (1, 10), (2, 20));
        second.method_id = "second".into();
        let canonical = dedup_links(vec![first, second]);
        assert_eq!(canonical.get("2").expect("2").method_id, "first");
    }

    #[test]
    fn empty_links_are_skipped() {
        let empty = Link {
            link_id: "9".into(),
            ..Link::default()
        };
        let canonical = dedup_links(vec![empty, link("1", (1, 1), (2, 2))]);
        assert!(!canonical.contains("9"));
        assert_eq!(canonical.stats().skipped, 1);
        assert_eq!(canonical.len(), 1);
    }

    #[test]
    fn dedup_is_idempotent() {
        let once = dedup_links(vec![
            link("1", (1, 10), (2, 20)),
            link("2", (2, 20), (1, 10)),
            link("3", (3, 30), (4, 40)),
            link("4", (4, 40), (3, 30)),
            link("5", (5, 50), (6, 60)),
        ]);
        let canonical_once = once.canonical();
        let twice = dedup_links(canonical_once.iter().map(|l| Link::clone(l)));

        let mut keys_once: Vec<_> = canonical_once.iter().map(|l| l.key.clone()).collect();
        let mut keys_twice: Vec<_> = twice.canonical().iter().map(|l| l.key.clone()).collect();
        keys_once.sort();
        keys_twice.sort();
        assert_eq!(keys_once, keys_twice);

        for raw in ["1", "2", "3", "4", "5"] {
            assert_eq!(
                once.get(raw).expect("once").key,
                twice.get(raw).expect("twice").key
            );
        }
    }
}
