//! Vault configuration
//!
//! Loaded once at process start from JSON. Algorithm identifiers are checked
//! against the hash, cipher and key-derivation registries before the typed
//! parse, so a typo in an algorithm name is reported as
//! `UnsupportedAlgorithm` rather than a generic JSON error.

use crate::crypto::{
    CipherAlgorithm, CipherStreamFactory, KdfAlgorithm, KdfParameters, KeyDerivationService,
    DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
};
use crate::error::{VaultError, VaultResult};
use crate::notary::NotarizationConfig;
use crate::stream::{HashAlgorithm, DEFAULT_TEE_BUFFER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Parameters registered under one key version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionConfig {
    pub version: u32,
    pub kdf: KdfParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub hash_algorithm: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub encryption_enabled: bool,
    /// Compare the computed digest against the caller's expected hash
    pub double_check: bool,

    pub active_key_version: u32,
    pub key_versions: Vec<KeyVersionConfig>,

    pub dedup_threshold_secs: u64,
    pub dedup_sweep_interval_secs: u64,
    pub archive_interval_secs: u64,
    pub notarization_interval_secs: u64,
    pub orphan_sweep_interval_secs: u64,
    /// Orphan blobs younger than this are left alone
    pub orphan_grace_secs: u64,

    /// Query passed to the source when listing items flagged for archiving
    pub archive_query: String,
    /// Ask the source to delete an item once it is archived
    pub delete_source_after_archive: bool,
    pub worker_count: usize,
    pub tee_buffer_size: usize,
    pub cipher_chunk_size: usize,

    pub notarization: NotarizationConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            cipher: CipherAlgorithm::default(),
            encryption_enabled: true,
            double_check: true,
            active_key_version: 1,
            key_versions: vec![KeyVersionConfig {
                version: 1,
                kdf: KdfParameters::recommended(KdfAlgorithm::Pbkdf2),
            }],
            dedup_threshold_secs: 300,
            dedup_sweep_interval_secs: 600,
            archive_interval_secs: 60,
            notarization_interval_secs: 300,
            orphan_sweep_interval_secs: 3600,
            orphan_grace_secs: 86_400,
            archive_query: "archive:flagged".to_string(),
            delete_source_after_archive: false,
            worker_count: 4,
            tee_buffer_size: DEFAULT_TEE_BUFFER,
            cipher_chunk_size: DEFAULT_CHUNK_SIZE,
            notarization: NotarizationConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> VaultResult<Self> {
        let mut value: Value = serde_json::from_str(json)
            .map_err(|e| VaultError::ConfigError(format!("invalid JSON: {}", e)))?;
        check_registries(&mut value)?;

        let config: VaultConfig = serde_json::from_value(value)
            .map_err(|e| VaultError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VaultError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> VaultResult<()> {
        let intervals = [
            ("dedup_threshold_secs", self.dedup_threshold_secs),
            ("dedup_sweep_interval_secs", self.dedup_sweep_interval_secs),
            ("archive_interval_secs", self.archive_interval_secs),
            ("notarization_interval_secs", self.notarization_interval_secs),
            ("orphan_sweep_interval_secs", self.orphan_sweep_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(VaultError::ConfigError(format!("{} must be positive", name)));
            }
        }
        if self.worker_count == 0 {
            return Err(VaultError::ConfigError("worker_count must be at least 1".to_string()));
        }
        if self.tee_buffer_size == 0 {
            return Err(VaultError::ConfigError("tee_buffer_size must be positive".to_string()));
        }
        if self.cipher_chunk_size == 0 || self.cipher_chunk_size > MAX_CHUNK_SIZE {
            return Err(VaultError::ConfigError(format!(
                "cipher_chunk_size must be between 1 and {}",
                MAX_CHUNK_SIZE
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.key_versions {
            if !seen.insert(entry.version) {
                return Err(VaultError::ConfigError(format!(
                    "key version {} is defined more than once",
                    entry.version
                )));
            }
            entry.kdf.validate()?;
        }
        if !seen.contains(&self.active_key_version) {
            return Err(VaultError::ConfigError(format!(
                "active key version {} is not in key_versions",
                self.active_key_version
            )));
        }
        Ok(())
    }

    /// Key derivation registry built from `key_versions`
    pub fn key_derivation_service(&self) -> VaultResult<KeyDerivationService> {
        KeyDerivationService::new(
            self.key_versions.iter().map(|entry| (entry.version, entry.kdf.clone())),
            self.active_key_version,
        )
    }

    pub fn cipher_factory(&self) -> CipherStreamFactory {
        CipherStreamFactory::new(self.cipher, self.cipher_chunk_size)
    }

    pub fn dedup_threshold(&self) -> Duration {
        Duration::from_secs(self.dedup_threshold_secs)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }
}

/// Resolve algorithm ids against the registries, canonicalizing KDF aliases in place
fn check_registries(value: &mut Value) -> VaultResult<()> {
    if let Some(id) = value.get("cipher").and_then(Value::as_str) {
        let canonical = id.parse::<CipherAlgorithm>()?.id();
        value["cipher"] = Value::String(canonical.to_string());
    }
    if let Some(id) = value.get("hash_algorithm").and_then(Value::as_str) {
        let canonical = id.parse::<HashAlgorithm>()?.id();
        value["hash_algorithm"] = Value::String(canonical.to_string());
    }

    if let Some(versions) = value.get_mut("key_versions").and_then(Value::as_array_mut) {
        for entry in versions {
            if let Some(kdf) = entry.get("kdf") {
                let params = KdfParameters::from_json(kdf)?;
                entry["kdf"] = serde_json::to_value(params)?;
            }
        }
    }
    Ok(())
}
