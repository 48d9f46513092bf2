//! Key derivation for artifact encryption keys
//!
//! Every archived artifact gets its own random salt; the encryption key is
//! re-derived from the master secret and that salt on restore, so keys are
//! never stored. Three algorithms are supported, each with its own validated
//! parameter set:
//!
//! - PBKDF2-HMAC-SHA256 (at least 100,000 iterations)
//! - HKDF-SHA256 (info string for domain separation)
//! - Argon2id (at least 64 MiB of memory)
//!
//! Parameter sets are registered under integer key versions. Artifacts record
//! the version they were written with, and older versions stay registered so
//! those artifacts remain restorable after the active version changes.

use super::secret::MasterSecret;
use crate::error::{VaultError, VaultResult};
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 32;
pub const MIN_SALT_SIZE: usize = 8;

pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;
pub const MIN_ARGON2_MEMORY_KIB: u32 = 64 * 1024;
pub const MAX_ARGON2_MEMORY_KIB: u32 = 4 * 1024 * 1024;
pub const MAX_ARGON2_PARALLELISM: u32 = 16;
pub const MAX_HKDF_INFO_LEN: usize = 1024;

/// Identifier of a key derivation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KdfAlgorithm {
    Pbkdf2,
    Hkdf,
    Argon2,
}

impl KdfAlgorithm {
    pub const ALL: [KdfAlgorithm; 3] = [KdfAlgorithm::Pbkdf2, KdfAlgorithm::Hkdf, KdfAlgorithm::Argon2];

    pub fn id(&self) -> &'static str {
        match self {
            KdfAlgorithm::Pbkdf2 => "PBKDF2-HMAC-SHA256",
            KdfAlgorithm::Hkdf => "HKDF-SHA256",
            KdfAlgorithm::Argon2 => "ARGON2ID",
        }
    }

    fn short_name(&self) -> &'static str {
        match self {
            KdfAlgorithm::Pbkdf2 => "pbkdf2",
            KdfAlgorithm::Hkdf => "hkdf",
            KdfAlgorithm::Argon2 => "argon2",
        }
    }
}

impl fmt::Display for KdfAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for KdfAlgorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KdfAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.id().eq_ignore_ascii_case(s) || alg.short_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| VaultError::UnsupportedAlgorithm(format!("key derivation '{}'", s)))
    }
}

/// Parameters for exactly one key derivation algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum KdfParameters {
    #[serde(rename = "PBKDF2-HMAC-SHA256")]
    Pbkdf2 { iterations: u32 },

    #[serde(rename = "HKDF-SHA256")]
    Hkdf { info: String },

    #[serde(rename = "ARGON2ID")]
    Argon2 {
        parallelism: u32,
        memory_kib: u32,
        iterations: u32,
    },
}

impl KdfParameters {
    pub fn algorithm(&self) -> KdfAlgorithm {
        match self {
            KdfParameters::Pbkdf2 { .. } => KdfAlgorithm::Pbkdf2,
            KdfParameters::Hkdf { .. } => KdfAlgorithm::Hkdf,
            KdfParameters::Argon2 { .. } => KdfAlgorithm::Argon2,
        }
    }

    /// Recommended parameters for an algorithm
    pub fn recommended(algorithm: KdfAlgorithm) -> Self {
        match algorithm {
            KdfAlgorithm::Pbkdf2 => KdfParameters::Pbkdf2 {
                iterations: 600_000, // OWASP recommendation for PBKDF2-HMAC-SHA256
            },
            KdfAlgorithm::Hkdf => KdfParameters::Hkdf {
                info: "archivault/content-key/v1".to_string(),
            },
            KdfAlgorithm::Argon2 => KdfParameters::Argon2 {
                parallelism: 1,
                memory_kib: MIN_ARGON2_MEMORY_KIB,
                iterations: 3,
            },
        }
    }

    /// Parse a parameter object, rejecting unknown algorithm ids before field validation
    pub fn from_json(value: &serde_json::Value) -> VaultResult<Self> {
        let id = value
            .get("algorithm")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VaultError::InvalidKdfParameters("missing 'algorithm' field".to_string()))?;
        let algorithm: KdfAlgorithm = id.parse()?;

        let mut canonical = value.clone();
        canonical["algorithm"] = serde_json::Value::String(algorithm.id().to_string());
        let params: KdfParameters = serde_json::from_value(canonical)
            .map_err(|e| VaultError::InvalidKdfParameters(format!("{}: {}", algorithm, e)))?;
        params.validate()?;
        Ok(params)
    }

    /// Check this variant's own bounds
    pub fn validate(&self) -> VaultResult<()> {
        match self {
            KdfParameters::Pbkdf2 { iterations } => {
                if *iterations < MIN_PBKDF2_ITERATIONS {
                    return Err(VaultError::InvalidKdfParameters(format!(
                        "PBKDF2 requires at least {} iterations, got {}",
                        MIN_PBKDF2_ITERATIONS, iterations
                    )));
                }
            }
            KdfParameters::Hkdf { info } => {
                if info.len() > MAX_HKDF_INFO_LEN {
                    return Err(VaultError::InvalidKdfParameters(format!(
                        "HKDF info must be at most {} bytes",
                        MAX_HKDF_INFO_LEN
                    )));
                }
            }
            KdfParameters::Argon2 {
                parallelism,
                memory_kib,
                iterations,
            } => {
                if *memory_kib < MIN_ARGON2_MEMORY_KIB || *memory_kib > MAX_ARGON2_MEMORY_KIB {
                    return Err(VaultError::InvalidKdfParameters(format!(
                        "Argon2 memory must be between {} and {} KiB, got {}",
                        MIN_ARGON2_MEMORY_KIB, MAX_ARGON2_MEMORY_KIB, memory_kib
                    )));
                }
                if *parallelism == 0 || *parallelism > MAX_ARGON2_PARALLELISM {
                    return Err(VaultError::InvalidKdfParameters(format!(
                        "Argon2 parallelism must be between 1 and {}, got {}",
                        MAX_ARGON2_PARALLELISM, parallelism
                    )));
                }
                if *iterations == 0 {
                    return Err(VaultError::InvalidKdfParameters(
                        "Argon2 requires at least one iteration".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// 256-bit symmetric key, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Generate a fresh random salt for one artifact
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a key from `secret` and `salt` with the given parameters
///
/// Deterministic: identical inputs always produce the identical key.
pub fn derive(secret: &[u8], salt: &[u8], params: &KdfParameters) -> VaultResult<DerivedKey> {
    if salt.len() < MIN_SALT_SIZE {
        return Err(VaultError::InvalidKdfParameters(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_SIZE,
            salt.len()
        )));
    }
    params.validate()?;

    let mut key = [0u8; KEY_SIZE];
    match params {
        KdfParameters::Pbkdf2 { iterations } => {
            pbkdf2_hmac::<Sha256>(secret, salt, *iterations, &mut key);
        }
        KdfParameters::Hkdf { info } => {
            Hkdf::<Sha256>::new(Some(salt), secret)
                .expand(info.as_bytes(), &mut key)
                .map_err(|_| VaultError::KeyDerivationFailed("HKDF expand failed".to_string()))?;
        }
        KdfParameters::Argon2 {
            parallelism,
            memory_kib,
            iterations,
        } => {
            let argon_params =
                argon2::Params::new(*memory_kib, *iterations, *parallelism, Some(KEY_SIZE))
                    .map_err(|e| VaultError::InvalidKdfParameters(e.to_string()))?;
            argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon_params)
                .hash_password_into(secret, salt, &mut key)
                .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
        }
    }

    let derived = DerivedKey(key);
    key.zeroize();
    Ok(derived)
}

/// Registry of key versions and the parameters that produced them
#[derive(Debug, Clone)]
pub struct KeyDerivationService {
    versions: BTreeMap<u32, KdfParameters>,
    active_version: u32,
}

impl KeyDerivationService {
    pub fn new(
        versions: impl IntoIterator<Item = (u32, KdfParameters)>,
        active_version: u32,
    ) -> VaultResult<Self> {
        let versions: BTreeMap<u32, KdfParameters> = versions.into_iter().collect();
        for params in versions.values() {
            params.validate()?;
        }
        if !versions.contains_key(&active_version) {
            return Err(VaultError::ConfigError(format!(
                "active key version {} has no registered parameters",
                active_version
            )));
        }
        Ok(Self {
            versions,
            active_version,
        })
    }

    /// Service with a single key version 1
    pub fn single(params: KdfParameters) -> VaultResult<Self> {
        Self::new([(1, params)], 1)
    }

    pub fn active_version(&self) -> u32 {
        self.active_version
    }

    /// Parameters registered for `version`
    pub fn parameters(&self, version: u32) -> VaultResult<&KdfParameters> {
        self.versions
            .get(&version)
            .ok_or_else(|| VaultError::UnsupportedAlgorithm(format!("key version {}", version)))
    }

    /// Derive a key for `version` on the blocking pool
    ///
    /// Argon2 and PBKDF2 are CPU-bound and would otherwise stall the I/O workers.
    pub async fn derive_for_version(
        &self,
        secret: Arc<MasterSecret>,
        salt: Vec<u8>,
        version: u32,
    ) -> VaultResult<DerivedKey> {
        let params = self.parameters(version)?.clone();
        tokio::task::spawn_blocking(move || derive(secret.expose(), &salt, &params)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_master_secret_32_bytes_long";
    const SALT: &[u8] = b"per-artifact-salt-0123456789abcd";

    fn pbkdf2() -> KdfParameters {
        KdfParameters::Pbkdf2 {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }

    fn hkdf() -> KdfParameters {
        KdfParameters::Hkdf {
            info: "test-info".to_string(),
        }
    }

    fn argon2() -> KdfParameters {
        KdfParameters::Argon2 {
            parallelism: 1,
            memory_kib: MIN_ARGON2_MEMORY_KIB,
            iterations: 1,
        }
    }

    #[test]
    fn test_derive_deterministic_for_each_algorithm() {
        for params in [pbkdf2(), hkdf(), argon2()] {
            let key1 = derive(SECRET, SALT, &params).unwrap();
            let key2 = derive(SECRET, SALT, &params).unwrap();
            assert_eq!(key1.as_bytes(), key2.as_bytes(), "{:?}", params);
        }
    }

    #[test]
    fn test_changing_any_input_changes_key() {
        let base = derive(SECRET, SALT, &hkdf()).unwrap();

        let other_secret = derive(b"another_master_secret_32_bytes!!", SALT, &hkdf()).unwrap();
        let other_salt = derive(SECRET, b"different-salt-value", &hkdf()).unwrap();
        let other_info = derive(
            SECRET,
            SALT,
            &KdfParameters::Hkdf {
                info: "other-info".to_string(),
            },
        )
        .unwrap();
        let other_algorithm = derive(SECRET, SALT, &pbkdf2()).unwrap();

        assert_ne!(base.as_bytes(), other_secret.as_bytes());
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
        assert_ne!(base.as_bytes(), other_info.as_bytes());
        assert_ne!(base.as_bytes(), other_algorithm.as_bytes());
    }

    #[test]
    fn test_pbkdf2_iteration_change_changes_key() {
        let a = derive(SECRET, SALT, &pbkdf2()).unwrap();
        let b = derive(
            SECRET,
            SALT,
            &KdfParameters::Pbkdf2 {
                iterations: MIN_PBKDF2_ITERATIONS + 1,
            },
        )
        .unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_pbkdf2_minimum_iterations() {
        let weak = KdfParameters::Pbkdf2 { iterations: 10_000 };
        assert!(matches!(weak.validate(), Err(VaultError::InvalidKdfParameters(_))));
        assert!(derive(SECRET, SALT, &weak).is_err());
    }

    #[test]
    fn test_argon2_minimum_memory() {
        let weak = KdfParameters::Argon2 {
            parallelism: 1,
            memory_kib: 19 * 1024,
            iterations: 2,
        };
        assert!(matches!(weak.validate(), Err(VaultError::InvalidKdfParameters(_))));

        let no_lanes = KdfParameters::Argon2 {
            parallelism: 0,
            memory_kib: MIN_ARGON2_MEMORY_KIB,
            iterations: 2,
        };
        assert!(no_lanes.validate().is_err());
    }

    #[test]
    fn test_short_salt_rejected() {
        let result = derive(SECRET, b"short", &hkdf());
        assert!(matches!(result, Err(VaultError::InvalidKdfParameters(_))));
    }

    #[test]
    fn test_algorithm_registry() {
        assert_eq!("pbkdf2".parse::<KdfAlgorithm>().unwrap(), KdfAlgorithm::Pbkdf2);
        assert_eq!("HKDF-SHA256".parse::<KdfAlgorithm>().unwrap(), KdfAlgorithm::Hkdf);
        assert_eq!("argon2id".parse::<KdfAlgorithm>().unwrap(), KdfAlgorithm::Argon2);
        assert!(matches!(
            "scrypt".parse::<KdfAlgorithm>(),
            Err(VaultError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_from_json_accepts_aliases() {
        let value = serde_json::json!({ "algorithm": "pbkdf2", "iterations": 200000 });
        let params = KdfParameters::from_json(&value).unwrap();
        assert_eq!(params, KdfParameters::Pbkdf2 { iterations: 200_000 });
    }

    #[test]
    fn test_from_json_unknown_algorithm() {
        let value = serde_json::json!({ "algorithm": "bcrypt", "cost": 12 });
        let result = KdfParameters::from_json(&value);
        assert!(matches!(result, Err(VaultError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_from_json_missing_fields() {
        let value = serde_json::json!({ "algorithm": "ARGON2ID", "parallelism": 1 });
        let result = KdfParameters::from_json(&value);
        assert!(matches!(result, Err(VaultError::InvalidKdfParameters(_))));
    }

    #[test]
    fn test_parameters_serialization() {
        let json = serde_json::to_value(argon2()).unwrap();
        assert_eq!(json["algorithm"], "ARGON2ID");
        assert_eq!(json["memory_kib"], MIN_ARGON2_MEMORY_KIB);
        let back: KdfParameters = serde_json::from_value(json).unwrap();
        assert_eq!(back, argon2());
    }

    #[test]
    fn test_service_versions() {
        let service = KeyDerivationService::new([(1, pbkdf2()), (2, hkdf())], 2).unwrap();
        assert_eq!(service.active_version(), 2);
        assert_eq!(service.parameters(1).unwrap(), &pbkdf2());
        assert!(matches!(
            service.parameters(9),
            Err(VaultError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_service_rejects_missing_active_version() {
        let result = KeyDerivationService::new([(1, hkdf())], 3);
        assert!(matches!(result, Err(VaultError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_derive_for_version_matches_direct_derive() {
        let service = KeyDerivationService::single(hkdf()).unwrap();
        let secret = Arc::new(MasterSecret::new(SECRET.to_vec()).unwrap());
        let key = service
            .derive_for_version(secret, SALT.to_vec(), 1)
            .await
            .unwrap();
        assert_eq!(key.as_bytes(), derive(SECRET, SALT, &hkdf()).unwrap().as_bytes());
    }

    #[test]
    fn test_generate_salt_is_fresh() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
