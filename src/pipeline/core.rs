use crate::config::VaultConfig;
use crate::crypto::{CipherStreamFactory, KeyDerivationService, MasterSecret};
use crate::error::{VaultError, VaultResult};
use crate::model::ContentMetadata;
use crate::repository::{MetadataStore, StoragePort};
use crate::stream::{HashAlgorithm, HashInfo, StreamFault, DEFAULT_TEE_BUFFER};
use std::sync::Arc;
use std::time::Duration;

/// Per-call switches for [`ArchivePipeline::archive`](super::ArchivePipeline::archive)
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    /// Hash the caller believes the content has (hex)
    pub expected_hash: Option<String>,

    /// Encrypt the stored blob
    pub encrypt: bool,

    /// Reject the archive if the computed hash differs from `expected_hash`
    pub double_check: bool,
}

impl ArchiveOptions {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            expected_hash: None,
            encrypt: config.encryption_enabled,
            double_check: config.double_check,
        }
    }

    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }
}

/// Timing of a single pipeline stage
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name
    pub stage_name: &'static str,

    /// Duration of execution
    pub duration: Duration,

    /// Whether the stage was skipped
    pub skipped: bool,
}

impl StageResult {
    pub fn success(stage_name: &'static str, duration: Duration) -> Self {
        Self {
            stage_name,
            duration,
            skipped: false,
        }
    }

    pub fn skipped(stage_name: &'static str) -> Self {
        Self {
            stage_name,
            duration: Duration::ZERO,
            skipped: true,
        }
    }
}

/// Outcome of a successful archive
#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub id: String,
    pub content_ref_id: String,
    pub hash: HashInfo,
    /// Plaintext bytes read from the source
    pub bytes: u64,
    pub encrypted: bool,
    pub key_version: u32,
    pub stages: Vec<StageResult>,
    pub total_duration: Duration,
}

impl ArchiveReport {
    /// Get the number of stages that were executed (not skipped)
    pub fn executed_stages(&self) -> usize {
        self.stages.iter().filter(|s| !s.skipped).count()
    }
}

/// Outcome of a successful restore
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub id: String,
    /// Plaintext bytes written to the sink
    pub bytes_written: u64,
    /// Digest recomputed during restore, when verification was requested
    pub hash: Option<HashInfo>,
    pub metadata: ContentMetadata,
}

/// Streams content between the source, the blob store and the metadata store
///
/// See [`archive`](Self::archive) and [`restore`](Self::restore).
pub struct ArchivePipeline {
    pub(super) storage: Arc<dyn StoragePort>,
    pub(super) metadata: Arc<dyn MetadataStore>,
    pub(super) keys: Arc<KeyDerivationService>,
    pub(super) ciphers: CipherStreamFactory,
    pub(super) secret: Arc<MasterSecret>,
    pub(super) hash_algorithm: HashAlgorithm,
    pub(super) tee_buffer: usize,
}

impl ArchivePipeline {
    pub fn new(
        storage: Arc<dyn StoragePort>,
        metadata: Arc<dyn MetadataStore>,
        keys: Arc<KeyDerivationService>,
        ciphers: CipherStreamFactory,
        secret: Arc<MasterSecret>,
    ) -> Self {
        Self {
            storage,
            metadata,
            keys,
            ciphers,
            secret,
            hash_algorithm: HashAlgorithm::default(),
            tee_buffer: DEFAULT_TEE_BUFFER,
        }
    }

    /// Build a pipeline with the algorithms and buffer sizes from `config`
    pub fn from_config(
        config: &VaultConfig,
        storage: Arc<dyn StoragePort>,
        metadata: Arc<dyn MetadataStore>,
        secret: Arc<MasterSecret>,
    ) -> VaultResult<Self> {
        config.validate()?;
        Ok(Self::new(
            storage,
            metadata,
            Arc::new(config.key_derivation_service()?),
            config.cipher_factory(),
            secret,
        )
        .with_hash_algorithm(config.hash_algorithm)
        .with_tee_buffer(config.tee_buffer_size))
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_tee_buffer(mut self, size: usize) -> Self {
        self.tee_buffer = size.max(1);
        self
    }

    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<dyn StoragePort> {
        &self.storage
    }
}

/// Pick the error that explains a two-branch failure
///
/// When one branch fails, its sibling usually fails too, but only with
/// `SiblingClosed`; report the other branch's error in that case.
pub(super) fn root_cause(first: VaultError, second: VaultError) -> VaultError {
    let is_sibling = |err: &VaultError| {
        matches!(err, VaultError::Io(io) if StreamFault::from_io(io) == Some(&StreamFault::SiblingClosed))
    };
    if is_sibling(&first) && !is_sibling(&second) {
        second
    } else {
        first
    }
}
