//! Notarization of archived content hashes
//!
//! A notarizer records a content hash in a system outside the vault and
//! returns a transaction id that can later be used to prove the hash existed.
//! The notarization sweep calls [`NotarizationPort::store`] for every record
//! still missing a transaction id.

pub mod config;
pub mod factory;
pub mod http;
pub mod mock;

pub use config::{NotarizationConfig, NotarizationEnvironment};
pub use factory::NotarizerFactory;
pub use http::HttpNotarizer;
pub use mock::MockNotarizer;

use crate::error::VaultResult;
use crate::stream::HashInfo;
use async_trait::async_trait;

/// External service that durably records a content hash
#[async_trait]
pub trait NotarizationPort: Send + Sync {
    /// Record `hash` for archive entry `id`, returning the transaction id
    ///
    /// Failures are reported as `VaultError::ExternalService`.
    async fn store(&self, id: &str, hash: &HashInfo) -> VaultResult<String>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
