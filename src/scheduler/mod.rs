//! Periodic background jobs
//!
//! Three sweeps run on independent intervals, plus the dedup sweeper:
//!
//! - archive: pull flagged items from the source and archive them
//! - notarize: notarize records still missing a transaction id
//! - orphans: delete stored blobs no record points at
//!
//! Every job holds its own [`JobLock`], so a slow run makes the next tick of
//! the same job skip instead of overlapping it.

pub mod jobs;
pub mod lock;

pub use jobs::{ArchiveOutcome, JobRunner, JobSettings, SweepReport};
pub use lock::JobLock;

use crate::config::VaultConfig;
use crate::dedup;
use crate::error::VaultResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Archive,
    Notarize,
    Orphans,
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::Archive => "archive",
            Job::Notarize => "notarize",
            Job::Orphans => "orphans",
        }
    }

    async fn run(&self, runner: &JobRunner) -> VaultResult<Option<SweepReport>> {
        match self {
            Job::Archive => runner.archive_sweep().await,
            Job::Notarize => runner.notarization_sweep().await,
            Job::Orphans => runner.orphan_sweep().await,
        }
    }
}

/// Starts the job loops
pub struct Scheduler;

impl Scheduler {
    /// Spawn every job loop on the current runtime
    ///
    /// Each loop fires once immediately, then on its configured interval.
    /// An invalid configuration (a zero interval, for one) is rejected before
    /// anything is spawned.
    pub fn start(runner: Arc<JobRunner>, config: &VaultConfig) -> VaultResult<SchedulerHandle> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let secs = Duration::from_secs;

        let mut handles = vec![
            spawn_job(Job::Archive, secs(config.archive_interval_secs), runner.clone(), shutdown_rx.clone()),
            spawn_job(Job::Notarize, secs(config.notarization_interval_secs), runner.clone(), shutdown_rx.clone()),
            spawn_job(Job::Orphans, secs(config.orphan_sweep_interval_secs), runner.clone(), shutdown_rx.clone()),
        ];
        handles.push(dedup::spawn_sweeper(
            runner.dedup(),
            secs(config.dedup_sweep_interval_secs),
            shutdown_rx,
        ));

        info!(target: "scheduler", jobs = handles.len(), "scheduler started");
        Ok(SchedulerHandle {
            shutdown_tx,
            handles,
        })
    }
}

fn spawn_job(
    job: Job,
    interval: Duration,
    runner: Arc<JobRunner>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match job.run(&runner).await {
                        Ok(Some(report)) => {
                            info!(target: "scheduler", job = job.name(), processed = report.processed, failed = report.failed, "job run finished");
                        }
                        Ok(None) => {
                            debug!(target: "scheduler", job = job.name(), "job run skipped");
                        }
                        Err(err) => {
                            error!(target: "scheduler", job = job.name(), error = %err, "job run failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(target: "scheduler", job = job.name(), "job loop stopped");
    })
}

/// Handle to the running job loops
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop all loops, letting a run already in progress finish first
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(target: "scheduler", error = %err, "job loop ended abnormally");
            }
        }
        info!(target: "scheduler", "scheduler stopped");
    }
}
