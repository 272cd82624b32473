//! Standalone publication of the raw transcriptions.
//!
//! Every source that ships a transcribed file is streamed row by row into a fresh generation of
//! the `transcribed` index, keyed `{source_id}-{pa_id}` like the appearances. No standardized
//! rows, links or lifecourses are involved. The alias only moves once every file has been read.

use std::time::{Duration, Instant};

use crate::config::RunConfig;
use crate::constants::TRANSCRIBED_ALIAS;
use crate::error::Result;
use crate::index::{ActivationReport, IndexClient, IndexLifecycle};
use crate::pipeline::{abort, load_sources};
use crate::publish::{BatchPublisher, PublishStats};
use crate::reader::CsvDataset;
use crate::types::{Source, TranscribedPa};

#[derive(Debug, Clone, Default)]
pub struct TranscribedReport {
    /// Sources whose transcribed file was read.
    pub sources: usize,
    /// Transcriptions accepted by the engine.
    pub published: usize,
    /// Rows that could not be read or carried no usable `pa_id`.
    pub skipped: usize,
    pub publish: PublishStats,
    pub activated: Option<ActivationReport>,
    pub elapsed: Duration,
}

/// Publishes every source's transcribed rows behind the `transcribed` alias.
pub struct TranscribedIndexer<'a, C: IndexClient + ?Sized> {
    config: &'a RunConfig,
    client: &'a C,
}

impl<'a, C: IndexClient + ?Sized> TranscribedIndexer<'a, C> {
    pub fn new(config: &'a RunConfig, client: &'a C) -> Self {
        Self { config, client }
    }

    pub fn run(self) -> Result<TranscribedReport> {
        let started = Instant::now();
        self.config.check_limits()?;
        tracing::info!(
            target = "lifecourse::transcribed",
            dataset = %self.config.dataset_root.display(),
            transcribed = %self.config.transcribed_root.display(),
            backend = self.client.name(),
            "starting transcribed run"
        );

        let mut lifecycle = IndexLifecycle::new(self.client);
        let mut report = TranscribedReport::default();
        if let Err(err) = self.populate(&mut lifecycle, &mut report) {
            return Err(abort(&mut lifecycle, err));
        }
        report.activated = match lifecycle.activate(TRANSCRIBED_ALIAS) {
            Ok(activated) => Some(activated),
            Err(err) => return Err(abort(&mut lifecycle, err)),
        };

        report.elapsed = started.elapsed();
        tracing::info!(
            target = "lifecourse::transcribed",
            sources = report.sources,
            published = report.published,
            skipped = report.skipped,
            batches_dropped = report.publish.batches_dropped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "transcribed run complete"
        );
        Ok(report)
    }

    fn populate(
        &self,
        lifecycle: &mut IndexLifecycle<'a, C>,
        report: &mut TranscribedReport,
    ) -> Result<()> {
        let index = lifecycle.create(TRANSCRIBED_ALIAS)?;
        let publisher =
            BatchPublisher::new(self.client, self.config.batch_size, self.config.flush_interval);

        let mut remaining = self.config.is_bounded().then_some(self.config.max_entries);
        for source in load_sources(self.config)? {
            if remaining == Some(0) {
                break;
            }
            let reference = source.original_data_reference.trim();
            if reference.is_empty() {
                tracing::debug!(
                    target = "lifecourse::transcribed",
                    source = %source.source_name,
                    "source has no transcribed file"
                );
                continue;
            }
            let file = CsvDataset::open(self.config.transcribed_path(reference))?;
            let published = self.publish_file(&publisher, &index, &source, &file, &mut remaining, report)?;
            report.sources += 1;
            report.published += published;
            tracing::info!(
                target = "lifecourse::transcribed",
                source = %source.source_name,
                source_id = source.source_id,
                published,
                "published transcriptions"
            );
        }

        self.client.refresh(&index)?;
        lifecycle.mark_populated(TRANSCRIBED_ALIAS)?;
        report.publish = publisher.stats();
        Ok(())
    }

    fn publish_file(
        &self,
        publisher: &BatchPublisher<'_, C>,
        index: &str,
        source: &Source,
        file: &CsvDataset,
        remaining: &mut Option<usize>,
        report: &mut TranscribedReport,
    ) -> Result<usize> {
        let batch_size = self.config.batch_size;
        let mut rows = file.records()?;
        let mut batch: Vec<TranscribedPa> = Vec::with_capacity(batch_size.min(4_096));
        let mut published = 0;
        loop {
            batch.clear();
            while batch.len() < batch_size && *remaining != Some(0) {
                let Some(row) = rows.next() else { break };
                let pa = row.and_then(|record| TranscribedPa::from_record(record, source.source_id));
                match pa {
                    Ok(pa) => {
                        batch.push(pa);
                        if let Some(left) = remaining.as_mut() {
                            *left -= 1;
                        }
                    }
                    Err(err) => {
                        report.skipped += 1;
                        tracing::warn!(
                            target = "lifecourse::transcribed",
                            source_id = source.source_id,
                            error = %err,
                            "skipping transcribed row"
                        );
                    }
                }
            }
            if batch.is_empty() {
                break;
            }
            published += publisher.write_many(index, &batch)?;
        }
        Ok(published)
    }
}
