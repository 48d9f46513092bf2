//! Repository Pattern Implementation
//!
//! Abstract interfaces for the systems around the vault, with the concrete
//! backends the vault ships with.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Repository Traits               │
//! │  SourcePort · StoragePort · MetadataStore   │
//! └──────────────┬──────────────────────────────┘
//!                │
//!        ┌───────┴─────────┐
//!        │                 │
//! ┌──────▼───────┐  ┌──────▼──────────────┐
//! │FsBlobStore   │  │SqliteMetadataStore  │
//! │              │  │                     │
//! │- UUID files  │  │- rusqlite           │
//! │- temp+rename │  │- one row per item   │
//! └──────────────┘  └─────────────────────┘
//! ```
//!
//! `SourcePort` has no bundled backend: the content repository is supplied
//! by the embedding application.

pub mod fs;
pub mod sqlite;
pub mod traits;

// Re-export main types
pub use fs::FsBlobStore;
pub use sqlite::SqliteMetadataStore;
pub use traits::{BlobInfo, MetadataStore, SourcePort, StoragePort};
