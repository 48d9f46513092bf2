use crate::error::{VaultError, VaultResult};
use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Minimum master secret length in bytes
pub const MIN_SECRET_LEN: usize = 16;

/// Process-wide master secret that every artifact key is derived from
///
/// Never logged, never persisted; wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret(Vec<u8>);

impl MasterSecret {
    pub fn new(bytes: Vec<u8>) -> VaultResult<Self> {
        if bytes.len() < MIN_SECRET_LEN {
            return Err(VaultError::InvalidSecret(format!(
                "expected at least {} bytes, got {}",
                MIN_SECRET_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}

/// Supplies the master secret at process start
pub trait SecretPort: Send + Sync {
    fn master_secret(&self) -> VaultResult<MasterSecret>;
}

/// Secret held in memory, mainly for tests and embedding
pub struct StaticSecret {
    bytes: Zeroizing<Vec<u8>>,
}

impl StaticSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.into()),
        }
    }
}

impl SecretPort for StaticSecret {
    fn master_secret(&self) -> VaultResult<MasterSecret> {
        MasterSecret::new(self.bytes.to_vec())
    }
}

/// Secret read from a base64-encoded environment variable
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SecretPort for EnvSecret {
    fn master_secret(&self) -> VaultResult<MasterSecret> {
        let encoded = Zeroizing::new(std::env::var(&self.var).map_err(|_| {
            VaultError::InvalidSecret(format!("environment variable {} is not set", self.var))
        })?);
        let decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidSecret(format!("{} is not base64: {}", self.var, e)))?;
        MasterSecret::new(decoded)
    }
}
