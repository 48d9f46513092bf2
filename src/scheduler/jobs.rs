use super::lock::JobLock;
use crate::config::VaultConfig;
use crate::dedup::DedupGuard;
use crate::error::{VaultError, VaultResult};
use crate::notary::NotarizationPort;
use crate::pipeline::{ArchiveOptions, ArchivePipeline, ArchiveReport};
use crate::repository::SourcePort;
use crate::stream::HashInfo;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters for one sweep run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// What happened to one item in an archive sweep
#[derive(Debug)]
pub enum ArchiveOutcome {
    Archived(Box<ArchiveReport>),
    /// Another run already claimed this id inside the dedup window
    DuplicateSuppressed,
    /// The vault already holds a record for this id
    AlreadyArchived,
    Failed(VaultError),
}

impl SweepReport {
    fn record(&mut self, outcome: &ArchiveOutcome) {
        self.processed += 1;
        match outcome {
            ArchiveOutcome::Archived(_) => self.succeeded += 1,
            ArchiveOutcome::DuplicateSuppressed | ArchiveOutcome::AlreadyArchived => self.skipped += 1,
            ArchiveOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Sweep settings taken from configuration
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub archive_query: String,
    pub worker_count: usize,
    pub options: ArchiveOptions,
    pub delete_source_after_archive: bool,
    pub orphan_grace: Duration,
}

impl JobSettings {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            archive_query: config.archive_query.clone(),
            worker_count: config.worker_count.max(1),
            options: ArchiveOptions::from_config(config),
            delete_source_after_archive: config.delete_source_after_archive,
            orphan_grace: config.orphan_grace(),
        }
    }
}

struct JobLocks {
    archive: JobLock,
    notarize: JobLock,
    orphans: JobLock,
}

/// Runs the periodic sweeps, each under its own run-lock
///
/// A sweep started while the previous run of the same job still holds its
/// lock returns `Ok(None)` without doing anything. Different jobs never
/// block each other.
pub struct JobRunner {
    source: Arc<dyn SourcePort>,
    pipeline: Arc<ArchivePipeline>,
    notarizer: Arc<dyn NotarizationPort>,
    dedup: Arc<dyn DedupGuard>,
    settings: JobSettings,
    locks: JobLocks,
}

impl JobRunner {
    pub fn new(
        source: Arc<dyn SourcePort>,
        pipeline: Arc<ArchivePipeline>,
        notarizer: Arc<dyn NotarizationPort>,
        dedup: Arc<dyn DedupGuard>,
        settings: JobSettings,
    ) -> Self {
        Self {
            source,
            pipeline,
            notarizer,
            dedup,
            settings,
            locks: JobLocks {
                archive: JobLock::new("archive"),
                notarize: JobLock::new("notarize"),
                orphans: JobLock::new("orphans"),
            },
        }
    }

    pub fn dedup(&self) -> Arc<dyn DedupGuard> {
        self.dedup.clone()
    }

    pub fn pipeline(&self) -> &Arc<ArchivePipeline> {
        &self.pipeline
    }

    // ============================================================================
    // Archive sweep
    // ============================================================================

    /// Archive every item the source currently flags, `worker_count` at a time
    pub async fn archive_sweep(&self) -> VaultResult<Option<SweepReport>> {
        let Some(_guard) = self.locks.archive.try_acquire() else {
            info!(target: "scheduler::archive", job = self.locks.archive.name(), "previous run still in progress, skipping");
            return Ok(None);
        };

        let ids = self
            .source
            .list_flagged_for_archiving(&self.settings.archive_query)
            .await?;
        debug!(target: "scheduler::archive", count = ids.len(), "items flagged for archiving");

        let outcomes: Vec<ArchiveOutcome> = stream::iter(ids)
            .map(|id| self.archive_one(id))
            .buffer_unordered(self.settings.worker_count)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for outcome in &outcomes {
            report.record(outcome);
        }
        info!(
            target: "scheduler::archive",
            processed = report.processed,
            archived = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "archive sweep finished"
        );
        Ok(Some(report))
    }

    /// Archive a single item, turning every failure into an outcome
    pub async fn archive_one(&self, id: String) -> ArchiveOutcome {
        match self.dedup.test(&id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: "scheduler::archive", id = %id, "duplicate request suppressed");
                return ArchiveOutcome::DuplicateSuppressed;
            }
            Err(err) => return self.failed(&id, err),
        }

        let mut content = match self.source.fetch_content(&id).await {
            Ok(content) => content,
            Err(err) => return self.failed(&id, err),
        };

        let mut options = self.settings.options.clone();
        if let Some(expected) = content.expected_hash.take() {
            options.expected_hash = Some(expected);
        }

        match self.pipeline.archive(content, &options).await {
            Ok(report) => {
                self.settle_source(&id).await;
                ArchiveOutcome::Archived(Box::new(report))
            }
            Err(VaultError::AlreadyArchived(_)) => {
                // The source missed an earlier notice; tell it again.
                debug!(target: "scheduler::archive", id = %id, "already archived");
                self.settle_source(&id).await;
                ArchiveOutcome::AlreadyArchived
            }
            Err(err) => self.failed(&id, err),
        }
    }

    async fn settle_source(&self, id: &str) {
        if let Err(err) = self.source.mark_archived(id).await {
            warn!(target: "scheduler::archive", id, error = %err, "failed to mark source item archived");
            return;
        }
        if self.settings.delete_source_after_archive {
            if let Err(err) = self.source.delete(id).await {
                warn!(target: "scheduler::archive", id, error = %err, "failed to delete archived source item");
            }
        }
    }

    fn failed(&self, id: &str, err: VaultError) -> ArchiveOutcome {
        warn!(target: "scheduler::archive", id, error = %err, "archiving failed");
        ArchiveOutcome::Failed(err)
    }

    // ============================================================================
    // Notarization sweep
    // ============================================================================

    /// Notarize every archived record still missing a transaction id
    pub async fn notarization_sweep(&self) -> VaultResult<Option<SweepReport>> {
        let Some(_guard) = self.locks.notarize.try_acquire() else {
            info!(target: "scheduler::notarize", job = self.locks.notarize.name(), "previous run still in progress, skipping");
            return Ok(None);
        };

        let metadata = self.pipeline.metadata_store();
        let pending = metadata.find_missing_notarization()?;
        let mut report = SweepReport::default();

        for (record, content) in pending {
            report.processed += 1;
            let hash = HashInfo {
                algorithm: content.hash_algorithm,
                value: content.hash,
            };

            let tx_id = match self.notarizer.store(&record.id, &hash).await {
                Ok(tx_id) => tx_id,
                Err(err) => {
                    warn!(target: "scheduler::notarize", id = %record.id, notarizer = self.notarizer.name(), error = %err, "notarization failed");
                    report.failed += 1;
                    continue;
                }
            };

            match metadata.set_notarization_tx(&record.id, &tx_id) {
                Ok(()) => {
                    debug!(target: "scheduler::notarize", id = %record.id, tx = %tx_id, "record notarized");
                    report.succeeded += 1;
                }
                Err(err) => {
                    warn!(target: "scheduler::notarize", id = %record.id, tx = %tx_id, error = %err, "failed to persist notarization");
                    report.failed += 1;
                }
            }
        }

        info!(
            target: "scheduler::notarize",
            processed = report.processed,
            notarized = report.succeeded,
            failed = report.failed,
            "notarization sweep finished"
        );
        Ok(Some(report))
    }

    // ============================================================================
    // Orphan sweep
    // ============================================================================

    /// Delete stored blobs no record points at once they are older than the grace period
    pub async fn orphan_sweep(&self) -> VaultResult<Option<SweepReport>> {
        let Some(_guard) = self.locks.orphans.try_acquire() else {
            info!(target: "scheduler::orphans", job = self.locks.orphans.name(), "previous run still in progress, skipping");
            return Ok(None);
        };

        let grace = chrono::Duration::from_std(self.settings.orphan_grace)
            .map_err(|e| VaultError::ConfigError(format!("orphan grace period out of range: {}", e)))?;
        let cutoff = Utc::now() - grace;

        // Known refs are read before listing so a blob stored in between is young, not orphaned.
        let known = self.pipeline.metadata_store().content_refs()?;
        let storage = self.pipeline.storage();
        let blobs = storage.list().await?;
        let mut report = SweepReport::default();

        for blob in blobs.into_iter().filter(|b| !known.contains(&b.content_ref_id)) {
            report.processed += 1;
            if blob.created_at > cutoff {
                report.skipped += 1;
                continue;
            }
            match storage.delete(&blob.content_ref_id).await {
                Ok(()) => {
                    info!(target: "scheduler::orphans", blob = %blob.content_ref_id, "orphan blob deleted");
                    report.succeeded += 1;
                }
                Err(err) => {
                    warn!(target: "scheduler::orphans", blob = %blob.content_ref_id, error = %err, "failed to delete orphan blob");
                    report.failed += 1;
                }
            }
        }
        Ok(Some(report))
    }
}
