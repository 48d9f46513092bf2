use super::NotarizationPort;
use crate::error::{VaultError, VaultResult};
use crate::stream::HashInfo;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Mock notarizer for development and testing
///
/// Simulates a notarization service without any network calls. Individual
/// ids can be configured to fail so sweeps can be exercised against partial
/// outages.
pub struct MockNotarizer {
    /// Simulated network delay in milliseconds
    delay_ms: u64,

    /// Ids whose store call fails with `ExternalService`
    failing_ids: Mutex<HashSet<String>>,

    calls: AtomicUsize,
}

impl MockNotarizer {
    /// Create a new mock notarizer with default settings
    pub fn new() -> Self {
        Self::with_delay(100)
    }

    /// Create a mock notarizer with instant responses (no delay)
    pub fn instant() -> Self {
        Self::with_delay(0)
    }

    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            failing_ids: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every future store call for `id` fail
    pub fn fail_on(&self, id: impl Into<String>) -> VaultResult<()> {
        self.failing_ids.lock()?.insert(id.into());
        Ok(())
    }

    /// Number of store calls received, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockNotarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotarizationPort for MockNotarizer {
    async fn store(&self, id: &str, hash: &HashInfo) -> VaultResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        // Simulate network delay
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }

        if self.failing_ids.lock()?.contains(id) {
            return Err(VaultError::ExternalService(format!(
                "mock notarizer rejected {}",
                id
            )));
        }

        let prefix: String = hash.value.chars().take(12).collect();
        Ok(format!("mock-{}-{}", prefix, uuid::Uuid::new_v4()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
