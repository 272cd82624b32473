//! Person-appearance merging.
//!
//! For one source, standardized rows are held in memory keyed by `pa_id` while the transcribed
//! file is streamed row by row. Each transcription with a standardized counterpart becomes one
//! [`BasePa`]; the merge rule depends on the source family.

use std::collections::{HashMap, HashSet};

use crate::error::{IndexerError, Result};
use crate::reader::CsvDataset;
use crate::reverse::ReverseIndex;
use crate::types::{BasePa, Record, Source, SourceFamily, StandardPa, TranscribedPa};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub merged: usize,
    /// Transcriptions with no standardized row.
    pub unmatched: usize,
    /// Transcribed rows that could not be read or carried no usable id.
    pub unparsable: usize,
    /// Appearances dropped by the pa filter.
    pub filtered: usize,
    /// Repeated transcriptions of an appearance that was already emitted.
    pub repeated: usize,
}

/// Merges one source's standardized and transcribed rows.
#[derive(Debug, Clone, Copy)]
pub struct AppearanceMerger<'a> {
    source: &'a Source,
    data_version: &'a str,
    filter: Option<&'a ReverseIndex>,
}

impl<'a> AppearanceMerger<'a> {
    /// An absent or empty filter keeps every appearance.
    #[must_use]
    pub fn new(source: &'a Source, data_version: &'a str, filter: Option<&'a ReverseIndex>) -> Self {
        Self {
            source,
            data_version,
            filter: filter.filter(|index| !index.is_empty()),
        }
    }

    fn admits(&self, pa_key: &str) -> bool {
        self.filter.is_none_or(|index| index.contains(pa_key))
    }

    /// Standardized rows of the source, in file order, restricted to the filter when one is set.
    pub fn load_standard(&self, dataset: &CsvDataset) -> Result<Vec<StandardPa>> {
        let rows: Vec<StandardPa> = dataset
            .read::<StandardPa>()?
            .tolerant()
            .filter(|pa| self.admits(&self.source.pa_key(pa.pa_id)))
            .collect();
        tracing::debug!(
            target = "lifecourse::merge",
            source = %self.source.source_name,
            path = %dataset.path().display(),
            rows = rows.len(),
            "loaded standardized appearances"
        );
        Ok(rows)
    }

    /// Stream transcriptions against the standardized rows.
    pub fn merge<R>(&self, standard: Vec<StandardPa>, transcribed: R) -> MergedAppearances<'a, R>
    where
        R: Iterator<Item = Result<Record>>,
    {
        let standard: HashMap<u64, StandardPa> =
            standard.into_iter().map(|pa| (pa.pa_id, pa)).collect();
        MergedAppearances {
            merger: *self,
            inner: Inner::Transcribed {
                rows: transcribed,
                standard,
                emitted: HashSet::new(),
            },
            stats: MergeStats::default(),
        }
    }

    /// Appearances of a source that ships no transcription file.
    #[must_use]
    pub fn standard_only(
        &self,
        standard: Vec<StandardPa>,
    ) -> MergedAppearances<'a, std::iter::Empty<Result<Record>>> {
        MergedAppearances {
            merger: *self,
            inner: Inner::StandardOnly {
                rows: standard.into_iter(),
            },
            stats: MergeStats::default(),
        }
    }
}

enum Inner<R> {
    Transcribed {
        rows: R,
        standard: HashMap<u64, StandardPa>,
        emitted: HashSet<u64>,
    },
    StandardOnly {
        rows: std::vec::IntoIter<StandardPa>,
    },
}

/// Lazy stream of merged appearances for one source.
pub struct MergedAppearances<'a, R> {
    merger: AppearanceMerger<'a>,
    inner: Inner<R>,
    stats: MergeStats,
}

impl<R> MergedAppearances<'_, R> {
    #[must_use]
    pub fn stats(&self) -> MergeStats {
        self.stats
    }
}

impl<R> Iterator for MergedAppearances<'_, R>
where
    R: Iterator<Item = Result<Record>>,
{
    type Item = BasePa;

    fn next(&mut self) -> Option<BasePa> {
        let merger = self.merger;
        let source = merger.source;
        match &mut self.inner {
            Inner::StandardOnly { rows } => {
                let standard = rows.next()?;
                self.stats.merged += 1;
                Some(merge_appearance(source, standard, None, merger.data_version))
            }
            Inner::Transcribed {
                rows,
                standard,
                emitted,
            } => loop {
                let record = match rows.next()? {
                    Ok(record) => record,
                    Err(err) => {
                        self.stats.unparsable += 1;
                        tracing::error!(
                            target = "lifecourse::merge",
                            source = %source.source_name,
                            error = %err,
                            "failed to read transcribed row"
                        );
                        continue;
                    }
                };
                let transcribed = match TranscribedPa::from_record(record, source.source_id) {
                    Ok(pa) => pa,
                    Err(err) => {
                        self.stats.unparsable += 1;
                        tracing::error!(
                            target = "lifecourse::merge",
                            source = %source.source_name,
                            error = %err,
                            "failed to parse transcribed row"
                        );
                        continue;
                    }
                };
                if !merger.admits(&transcribed.key) {
                    self.stats.filtered += 1;
                    continue;
                }
                let Some(standard_pa) = standard.remove(&transcribed.pa_id) else {
                    if emitted.contains(&transcribed.pa_id) {
                        self.stats.repeated += 1;
                        tracing::debug!(
                            target = "lifecourse::merge",
                            pa_key = %transcribed.key,
                            "repeated transcription ignored"
                        );
                    } else {
                        self.stats.unmatched += 1;
                        let err = IndexerError::UnmatchedAppearance {
                            pa_key: transcribed.key,
                        };
                        tracing::warn!(target = "lifecourse::merge", error = %err, "skipping appearance");
                    }
                    continue;
                };
                emitted.insert(transcribed.pa_id);
                self.stats.merged += 1;
                return Some(merge_appearance(
                    source,
                    standard_pa,
                    Some(transcribed),
                    merger.data_version,
                ));
            },
        }
    }
}

/// Merge a standardized row and its optional transcription into one appearance.
#[must_use]
pub fn merge_appearance(
    source: &Source,
    standard: StandardPa,
    transcribed: Option<TranscribedPa>,
    data_version: &str,
) -> BasePa {
    let family = source.family();
    let mut event_year = standard.event_year;
    let mut birth_year = standard.birth_year;
    let mut death_year = standard.death_year;

    match family {
        SourceFamily::Census => {
            event_year = event_year.or(source.source_year);
            if birth_year.is_none() {
                birth_year = match (event_year, standard.age) {
                    (Some(year), Some(age)) if age >= 0.0 => Some(year - age.floor() as i32),
                    _ => None,
                };
            }
        }
        SourceFamily::BurialProtocol => {
            death_year = death_year.or(event_year);
        }
        SourceFamily::ParishRegister | SourceFamily::Other => {}
    }

    let first_name_sortable = sortable_name(&standard.first_names, &standard.name_cl, false);
    let last_name_sortable = sortable_name(&standard.family_names, &standard.name_cl, true);

    BasePa {
        key: source.pa_key(standard.pa_id),
        pa_id: standard.pa_id,
        source_id: source.source_id,
        family,
        transcribed: transcribed.map(|pa| pa.transcription),
        first_name_sortable,
        last_name_sortable,
        birth_year_sortable: birth_year,
        death_year_sortable: death_year,
        event_year_sortable: event_year,
        source_year_searchable: source.source_year,
        data_version: data_version.to_string(),
        standard,
    }
}

fn sortable_name(primary: &str, fallback: &str, last: bool) -> Option<String> {
    let pick = |names: &str| {
        let mut parts = names.split_whitespace();
        let name = if last { parts.next_back() } else { parts.next() };
        name.map(str::to_lowercase)
    };
    pick(primary).or_else(|| pick(fallback))
}
