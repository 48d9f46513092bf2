//! Streaming archive and restore
//!
//! ```text
//!                       ┌──────────────► DigestingStream ──► hash
//! source ──► StreamTee ─┤
//!                       └──► [encrypt] ──► StoragePort::put ──► content ref
//!                                                  │
//!                               metadata store ◄───┘ (after both branches finish)
//! ```
//!
//! Restore runs the same path backwards: blob ──► [decrypt] ──► tee ──►
//! sink and digest.
//!
//! # Example
//! ```no_run
//! use archivault::pipeline::{ArchiveOptions, ArchivePipeline};
//! use archivault::model::ContentObject;
//!
//! # async fn run(pipeline: ArchivePipeline) -> archivault::error::VaultResult<()> {
//! let content = ContentObject {
//!     id: "doc-1".to_string(),
//!     name: "report.pdf".to_string(),
//!     mime_type: "application/pdf".to_string(),
//!     length: Some(5),
//!     expected_hash: None,
//!     stream: Box::pin(std::io::Cursor::new(b"%PDF-".to_vec())),
//! };
//! let options = ArchiveOptions { encrypt: true, ..Default::default() };
//! let report = pipeline.archive(content, &options).await?;
//!
//! let mut restored = Vec::new();
//! pipeline.restore(&report.id, &mut restored, true).await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod core;
pub mod restore;

// Re-export main types
pub use core::{ArchiveOptions, ArchivePipeline, ArchiveReport, RestoreReport, StageResult};
