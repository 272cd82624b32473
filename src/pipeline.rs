//! End-to-end indexing run.
//!
//! Stages, in order: create this run's index generations, assemble lifecourses, publish their
//! baseline documents, mirror them to the relational store, build the reverse index, then fan
//! out over sources to publish appearances and route them to their lifecourses. Only when every
//! stage has succeeded are the aliases moved. Any error before that point deletes the new
//! generations and is returned to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::assemble::{AssemblyStats, LifecourseAssembler};
use crate::config::RunConfig;
use crate::constants::{LIFECOURSES_ALIAS, LIFECOURSES_FILE, LINKS_FILE, PAS_ALIAS, SOURCES_ALIAS, SOURCES_FILE};
use crate::error::{IndexerError, Result};
use crate::index::{ActivationReport, IndexClient, IndexLifecycle, UpdateScript};
use crate::links::DedupStats;
use crate::merge::{AppearanceMerger, MergeStats, MergedAppearances};
use crate::publish::{BatchPublisher, PublishStats};
use crate::reader::CsvDataset;
use crate::reverse::ReverseIndex;
use crate::store::RelationalStore;
use crate::types::{BasePa, LifeCourse, Record, Source};

/// Per-source outcome of the appearance stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub source_id: u32,
    pub source_name: String,
    pub family: &'static str,
    pub merge: MergeStats,
    /// Appearance documents accepted by the engine.
    pub published: usize,
    /// Lifecourse updates generated from the reverse index.
    pub routed: usize,
    /// Lifecourse updates the engine applied.
    pub applied: usize,
}

impl SourceReport {
    fn new(source: &Source) -> Self {
        Self {
            source_id: source.source_id,
            source_name: source.source_name.clone(),
            family: source.family().label(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub data_version: String,
    pub links: DedupStats,
    pub assembly: AssemblyStats,
    /// Lifecourses published as baseline documents.
    pub lifecourses: usize,
    /// Rows upserted into the relational store, when it ran.
    pub stored: Option<usize>,
    /// Rows flagged stale in the relational store, when it ran.
    pub stale: Option<usize>,
    pub sources: Vec<SourceReport>,
    pub publish: PublishStats,
    pub activated: Vec<ActivationReport>,
    pub snapshot: Option<String>,
    pub elapsed: Duration,
}

/// One indexing run against a search engine and, optionally, a relational store.
pub struct Indexer<'a, C: IndexClient + ?Sized> {
    config: &'a RunConfig,
    client: &'a C,
    store: Option<&'a mut dyn RelationalStore>,
}

impl<'a, C: IndexClient + ?Sized> Indexer<'a, C> {
    pub fn new(config: &'a RunConfig, client: &'a C) -> Self {
        Self {
            config,
            client,
            store: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: &'a mut dyn RelationalStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Run every stage and activate the new generations.
    pub fn run(mut self) -> Result<RunReport> {
        let started = Instant::now();
        let data_version = self.config.validate()?.to_string();
        tracing::info!(
            target = "lifecourse::pipeline",
            data_version = %data_version,
            dataset = %self.config.dataset_root.display(),
            backend = self.client.name(),
            bounded = self.config.is_bounded(),
            "starting run"
        );

        let mut lifecycle = IndexLifecycle::new(self.client);
        let mut report = RunReport {
            data_version: data_version.clone(),
            ..RunReport::default()
        };

        if let Err(err) = self.populate(&mut lifecycle, &data_version, &mut report) {
            return Err(abort(&mut lifecycle, err));
        }
        report.activated = match lifecycle.activate_all() {
            Ok(activated) => activated,
            Err(err) => return Err(abort(&mut lifecycle, err)),
        };

        if let Some(snapshot) = &self.config.snapshot {
            report.snapshot = Some(lifecycle.snapshot(&snapshot.repository, &snapshot.bucket)?);
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            target = "lifecourse::pipeline",
            lifecourses = report.lifecourses,
            sources = report.sources.len(),
            documents = report.publish.documents_written,
            updates = report.publish.updates_applied,
            batches_dropped = report.publish.batches_dropped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(report)
    }

    fn populate(
        &mut self,
        lifecycle: &mut IndexLifecycle<'a, C>,
        data_version: &str,
        report: &mut RunReport,
    ) -> Result<()> {
        let config = self.config;
        let pas_index = if config.skip_pas {
            None
        } else {
            Some(lifecycle.create(PAS_ALIAS)?)
        };
        let lifecourses_index = lifecycle.create(LIFECOURSES_ALIAS)?;
        let sources_index = lifecycle.create(SOURCES_ALIAS)?;
        let publisher = BatchPublisher::new(self.client, config.batch_size, config.flush_interval);

        let lifecourses_file = CsvDataset::open(config.dataset_path(LIFECOURSES_FILE))?;
        let links_file = CsvDataset::open(config.dataset_path(LINKS_FILE))?;
        let (assembly, canonical) = LifecourseAssembler::new(data_version, config.max_entries)
            .assemble_files(&lifecourses_file, &links_file)?;
        report.links = canonical.stats();
        report.assembly = assembly.stats;
        drop(canonical);
        let lifecourses = assembly.lifecourses;

        publisher.write_many(&lifecourses_index, &lifecourses)?;
        self.client.refresh(&lifecourses_index)?;
        report.lifecourses = lifecourses.len();

        self.mirror(&lifecourses, data_version, report)?;

        let reverse = Arc::new(ReverseIndex::build(&lifecourses));
        reverse.verify(&lifecourses)?;
        drop(lifecourses);
        tracing::info!(
            target = "lifecourse::pipeline",
            appearances = reverse.len(),
            lifecourses = reverse.lifecourse_count(),
            "built reverse index"
        );

        let sources = load_sources(config)?;
        match &pas_index {
            Some(pas_index) => {
                let stage = SourceStage {
                    config,
                    data_version,
                    reverse: Arc::clone(&reverse),
                    publisher: &publisher,
                    pas_index,
                    lifecourses_index: &lifecourses_index,
                };
                report.sources = stage.run(&sources)?;
                self.client.refresh(pas_index)?;
                self.client.refresh(&lifecourses_index)?;
                lifecycle.mark_populated(PAS_ALIAS)?;
            }
            None => tracing::info!(
                target = "lifecourse::pipeline",
                "skipping person appearances"
            ),
        }

        publisher.write_many(&sources_index, &sources)?;
        self.client.refresh(&sources_index)?;
        lifecycle.mark_populated(LIFECOURSES_ALIAS)?;
        lifecycle.mark_populated(SOURCES_ALIAS)?;
        report.publish = publisher.stats();
        Ok(())
    }

    fn mirror(
        &mut self,
        lifecourses: &[LifeCourse],
        data_version: &str,
        report: &mut RunReport,
    ) -> Result<()> {
        if self.config.skip_db {
            tracing::info!(target = "lifecourse::pipeline", "skipping relational store");
            return Ok(());
        }
        let Some(store) = self.store.as_deref_mut() else {
            tracing::debug!(target = "lifecourse::pipeline", "no relational store configured");
            return Ok(());
        };
        report.stored = Some(store.upsert_lifecourses(lifecourses, data_version)?);
        let keys: Vec<&str> = lifecourses.iter().map(|lc| lc.key.as_str()).collect();
        report.stale = Some(store.mark_stale_except(&keys)?);
        Ok(())
    }
}

/// Delete this run's unactivated generations and hand the error back.
pub(crate) fn abort<C: IndexClient + ?Sized>(lifecycle: &mut IndexLifecycle<'_, C>, err: IndexerError) -> IndexerError {
    tracing::error!(target = "lifecourse::pipeline", error = %err, "run failed; rolling back");
    let removed = lifecycle.rollback();
    tracing::warn!(
        target = "lifecourse::pipeline",
        removed = removed.len(),
        "rolled back new indices"
    );
    err
}

pub(crate) fn load_sources(config: &RunConfig) -> Result<Vec<Source>> {
    let file = CsvDataset::open(config.dataset_path(SOURCES_FILE))?;
    let sources: Vec<Source> = file.read::<Source>()?.tolerant().collect();
    tracing::info!(
        target = "lifecourse::pipeline",
        sources = sources.len(),
        "loaded source metadata"
    );
    Ok(sources)
}

/// Shared, read-only state of the per-source fan-out.
struct SourceStage<'s, C: IndexClient + ?Sized> {
    config: &'s RunConfig,
    data_version: &'s str,
    reverse: Arc<ReverseIndex>,
    publisher: &'s BatchPublisher<'s, C>,
    pas_index: &'s str,
    lifecourses_index: &'s str,
}

impl<C: IndexClient + ?Sized> SourceStage<'_, C> {
    fn run(&self, sources: &[Source]) -> Result<Vec<SourceReport>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency)
            .thread_name(|i| format!("lifecourse-source-{i}"))
            .build()
            .map_err(|err| IndexerError::Config(format!("worker pool: {err}").into()))?;
        pool.install(|| {
            sources
                .par_iter()
                .map(|source| self.publish_source(source))
                .collect()
        })
    }

    fn publish_source(&self, source: &Source) -> Result<SourceReport> {
        let started = Instant::now();
        let mut report = SourceReport::new(source);
        let filter = self.config.is_bounded().then_some(self.reverse.as_ref());
        let merger = AppearanceMerger::new(source, self.data_version, filter);

        let standard_file = CsvDataset::open(self.config.dataset_path(&source.file_reference))?;
        let standard = merger.load_standard(&standard_file)?;
        if standard.is_empty() {
            tracing::debug!(
                target = "lifecourse::pipeline",
                source = %source.source_name,
                "no standardized appearances"
            );
            return Ok(report);
        }

        let transcribed_ref = source.original_data_reference.trim();
        if transcribed_ref.is_empty() {
            self.drain(merger.standard_only(standard), &mut report)?;
        } else {
            let transcribed = CsvDataset::open(self.config.transcribed_path(transcribed_ref))?;
            self.drain(merger.merge(standard, transcribed.records()?), &mut report)?;
        }

        tracing::info!(
            target = "lifecourse::pipeline",
            source = %source.source_name,
            source_id = source.source_id,
            family = report.family,
            merged = report.merge.merged,
            unmatched = report.merge.unmatched,
            filtered = report.merge.filtered,
            published = report.published,
            applied = report.applied,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "published source"
        );
        Ok(report)
    }

    /// Publish merged appearances batch by batch, each batch followed by the lifecourse updates
    /// it produces.
    fn drain<R>(&self, mut merged: MergedAppearances<'_, R>, report: &mut SourceReport) -> Result<()>
    where
        R: Iterator<Item = Result<Record>>,
    {
        let batch_size = self.config.batch_size;
        let mut batch: Vec<BasePa> = Vec::with_capacity(batch_size.min(4_096));
        loop {
            batch.clear();
            batch.extend(merged.by_ref().take(batch_size));
            if batch.is_empty() {
                break;
            }
            report.published += self.publisher.write_many(self.pas_index, &batch)?;
            let updates = self.reverse.updates_for(&batch);
            report.routed += updates.len();
            report.applied += self.publisher.update_many(
                self.lifecourses_index,
                UpdateScript::AppendAppearance,
                updates,
            )?;
        }
        report.merge = merged.stats();
        Ok(())
    }
}
