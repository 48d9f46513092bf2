//! Duplicate suppression for archive requests
//!
//! The archive sweep may see the same id again before a previous run for it
//! has finished (overlapping source queries, retries). A [`DedupGuard`] lets
//! exactly one caller through per id per time window.

use crate::error::VaultResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Decides whether an id may be processed now
pub trait DedupGuard: Send + Sync {
    /// Returns `true` for the first caller in a window, `false` for the rest
    ///
    /// Test and set happen atomically: of N concurrent callers for the same id
    /// exactly one sees `true`.
    fn test(&self, id: &str) -> VaultResult<bool>;

    /// Drop entries whose window has elapsed, returning how many were removed
    fn sweep(&self) -> VaultResult<usize>;
}

/// In-process guard keyed by id with a fixed window length
pub struct WindowedDedupGuard {
    threshold: Duration,
    next_eligible: Mutex<HashMap<String, Instant>>,
}

impl WindowedDedupGuard {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            next_eligible: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Number of ids currently tracked
    pub fn len(&self) -> VaultResult<usize> {
        Ok(self.next_eligible.lock()?.len())
    }

    pub fn is_empty(&self) -> VaultResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl DedupGuard for WindowedDedupGuard {
    fn test(&self, id: &str) -> VaultResult<bool> {
        let now = Instant::now();
        let mut map = self.next_eligible.lock()?;
        match map.get_mut(id) {
            Some(next) if now < *next => Ok(false),
            Some(next) => {
                *next = now + self.threshold;
                Ok(true)
            }
            None => {
                map.insert(id.to_string(), now + self.threshold);
                Ok(true)
            }
        }
    }

    fn sweep(&self) -> VaultResult<usize> {
        let now = Instant::now();
        let mut map = self.next_eligible.lock()?;
        let before = map.len();
        map.retain(|_, next| now < *next);
        Ok(before - map.len())
    }
}

/// Periodically sweep `guard` until `shutdown` flips to `true`
pub fn spawn_sweeper(
    guard: Arc<dyn DedupGuard>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match guard.sweep() {
                        Ok(removed) => {
                            debug!(target: "dedup", removed, "swept expired dedup entries");
                        }
                        Err(err) => {
                            warn!(target: "dedup", error = %err, "dedup sweep failed");
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
    })
}
