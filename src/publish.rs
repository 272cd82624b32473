//! Batched publication of documents and scripted updates.
//!
//! Items are buffered and flushed when the batch is full or when the flush interval has elapsed
//! since the previous flush. A batch rejected by the engine or timing out is logged and dropped;
//! an unreachable engine aborts the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Result;
use crate::index::{BulkDocument, BulkOutcome, IndexClient, IndexDocument, ScriptedUpdate, UpdateScript};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub documents_written: usize,
    pub documents_failed: usize,
    pub updates_applied: usize,
    pub updates_failed: usize,
    /// Whole batches dropped after a transient error.
    pub batches_dropped: usize,
}

#[derive(Debug, Default)]
struct Counters {
    documents_written: AtomicUsize,
    documents_failed: AtomicUsize,
    updates_applied: AtomicUsize,
    updates_failed: AtomicUsize,
    batches_dropped: AtomicUsize,
}

/// Shared by every per-source worker of a run.
pub struct BatchPublisher<'c, C: IndexClient + ?Sized> {
    client: &'c C,
    batch_size: usize,
    flush_interval: Duration,
    counters: Counters,
}

#[derive(Clone, Copy)]
enum Batch {
    Write,
    Update,
}

impl<'c, C: IndexClient + ?Sized> BatchPublisher<'c, C> {
    pub fn new(client: &'c C, batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            flush_interval,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn client(&self) -> &'c C {
        self.client
    }

    #[must_use]
    pub fn stats(&self) -> PublishStats {
        PublishStats {
            documents_written: self.counters.documents_written.load(Ordering::Relaxed),
            documents_failed: self.counters.documents_failed.load(Ordering::Relaxed),
            updates_applied: self.counters.updates_applied.load(Ordering::Relaxed),
            updates_failed: self.counters.updates_failed.load(Ordering::Relaxed),
            batches_dropped: self.counters.batches_dropped.load(Ordering::Relaxed),
        }
    }

    /// Index `docs` into `index`. Returns how many the engine accepted.
    pub fn write_many<I>(&self, index: &str, docs: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: IndexDocument,
    {
        let mut pending: Vec<BulkDocument> = Vec::with_capacity(self.batch_size.min(1024));
        let mut last_flush = Instant::now();
        let mut accepted = 0;
        for doc in docs {
            pending.push(BulkDocument::from_document(&doc)?);
            if self.due(pending.len(), last_flush) {
                accepted += self.flush_writes(index, &mut pending)?;
                last_flush = Instant::now();
            }
        }
        if !pending.is_empty() {
            accepted += self.flush_writes(index, &mut pending)?;
        }
        Ok(accepted)
    }

    /// Apply `script` to each `(document id, params payload)` pair in `index`. The payload is
    /// passed to the script as `params.pa`. Returns how many updates the engine applied.
    pub fn update_many<I, P>(&self, index: &str, script: UpdateScript, updates: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, P)>,
        P: Serialize,
    {
        let mut pending: Vec<ScriptedUpdate> = Vec::with_capacity(self.batch_size.min(1024));
        let mut last_flush = Instant::now();
        let mut applied = 0;
        for (id, payload) in updates {
            pending.push(ScriptedUpdate {
                id,
                params: script.params(&payload)?,
            });
            if self.due(pending.len(), last_flush) {
                applied += self.flush_updates(index, script, &mut pending)?;
                last_flush = Instant::now();
            }
        }
        if !pending.is_empty() {
            applied += self.flush_updates(index, script, &mut pending)?;
        }
        Ok(applied)
    }

    fn due(&self, pending: usize, last_flush: Instant) -> bool {
        pending >= self.batch_size || last_flush.elapsed() >= self.flush_interval
    }

    fn flush_writes(&self, index: &str, pending: &mut Vec<BulkDocument>) -> Result<usize> {
        let result = self.client.bulk_write(index, pending);
        let sent = pending.len();
        pending.clear();
        self.settle(index, sent, result, Batch::Write)
    }

    fn flush_updates(
        &self,
        index: &str,
        script: UpdateScript,
        pending: &mut Vec<ScriptedUpdate>,
    ) -> Result<usize> {
        let result = self.client.bulk_update(index, script, pending);
        let sent = pending.len();
        pending.clear();
        self.settle(index, sent, result, Batch::Update)
    }

    fn settle(
        &self,
        index: &str,
        sent: usize,
        result: Result<BulkOutcome>,
        kind: Batch,
    ) -> Result<usize> {
        let (ok, failed) = match kind {
            Batch::Write => (&self.counters.documents_written, &self.counters.documents_failed),
            Batch::Update => (&self.counters.updates_applied, &self.counters.updates_failed),
        };
        match result {
            Ok(outcome) => {
                ok.fetch_add(outcome.succeeded, Ordering::Relaxed);
                failed.fetch_add(outcome.failed, Ordering::Relaxed);
                if outcome.failed > 0 {
                    tracing::warn!(
                        target = "lifecourse::publish",
                        index,
                        failed = outcome.failed,
                        succeeded = outcome.succeeded,
                        first_error = outcome.first_error.as_deref().unwrap_or(""),
                        "bulk items failed"
                    );
                } else {
                    tracing::debug!(
                        target = "lifecourse::publish",
                        index,
                        items = outcome.succeeded,
                        "flushed batch"
                    );
                }
                Ok(outcome.succeeded)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                failed.fetch_add(sent, Ordering::Relaxed);
                self.counters.batches_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target = "lifecourse::publish",
                    index,
                    items = sent,
                    updates = matches!(kind, Batch::Update),
                    error = %err,
                    "dropping batch"
                );
                Ok(0)
            }
        }
    }
}
