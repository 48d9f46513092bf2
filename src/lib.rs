//! Content vault archiver
//!
//! Streams content out of a source repository into a blob store, hashing it
//! in the same pass and optionally encrypting it at rest with a key derived
//! per artifact from one master secret. Archived hashes are notarized with an
//! external service on a schedule, and archives can be restored with the
//! hash re-verified along the way.
//!
//! - [`pipeline`]: archive and restore
//! - [`scheduler`]: archive, notarization and orphan sweeps
//! - [`repository`]: source, blob store and metadata store ports
//! - [`crypto`]: key derivation and chunked authenticated encryption
//! - [`stream`]: tee and digest plumbing shared by both directions

pub mod config;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod model;
pub mod notary;
pub mod pipeline;
pub mod repository;
pub mod scheduler;
pub mod stream;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use model::{ArchivedContent, ArchivedRecord, ContentMetadata, ContentObject};
pub use pipeline::{ArchiveOptions, ArchivePipeline, ArchiveReport, RestoreReport};
pub use scheduler::{JobRunner, JobSettings, Scheduler, SchedulerHandle};
pub use stream::{HashAlgorithm, HashInfo};
