//! Repository trait definitions
//!
//! These traits are the seams between the archive pipeline and the systems
//! around it: the content source being archived, the blob store holding
//! archived bytes, and the metadata store holding archive records.

use crate::error::VaultResult;
use crate::model::{ArchivedContent, ArchivedRecord, ContentObject};
use crate::stream::ByteStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// The managed content repository archived items come from
#[async_trait]
pub trait SourcePort: Send + Sync {
    /// Fetch an item with a fresh stream over its bytes
    async fn fetch_content(&self, id: &str) -> VaultResult<ContentObject>;

    /// Ids of items currently flagged for archiving
    async fn list_flagged_for_archiving(&self, query: &str) -> VaultResult<Vec<String>>;

    /// Tell the source an item now lives in the vault
    async fn mark_archived(&self, id: &str) -> VaultResult<()>;

    /// Remove an item from the source
    async fn delete(&self, id: &str) -> VaultResult<()>;
}

/// A blob as seen by the orphan sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub content_ref_id: String,
    pub created_at: DateTime<Utc>,
}

/// Durable blob storage for archived bytes
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Drain `stream` into a new blob and return its reference
    ///
    /// When `length` is given, a stream of any other length is rejected and
    /// nothing is stored.
    async fn put(&self, stream: ByteStream, length: Option<u64>) -> VaultResult<String>;

    /// Open a stored blob; an unknown reference is `NotFound`
    async fn get(&self, content_ref_id: &str) -> VaultResult<ByteStream>;

    async fn delete(&self, content_ref_id: &str) -> VaultResult<()>;

    async fn list(&self) -> VaultResult<Vec<BlobInfo>>;
}

/// Persistence for archive records and the blobs they describe
///
/// Implementations should be quick; they are called from async code.
pub trait MetadataStore: Send + Sync {
    /// Persist a new record; an id that already has one is `AlreadyArchived`
    fn save(&self, record: &ArchivedRecord, content: &ArchivedContent) -> VaultResult<()>;

    fn find_by_id(&self, id: &str) -> VaultResult<Option<(ArchivedRecord, ArchivedContent)>>;

    /// Records without a notarization transaction id
    ///
    /// Rows that fail to decode are logged and left out.
    fn find_missing_notarization(&self) -> VaultResult<Vec<(ArchivedRecord, ArchivedContent)>>;

    /// Set the notarization transaction id (idempotent)
    fn set_notarization_tx(&self, id: &str, tx_id: &str) -> VaultResult<()>;

    /// Flip `restored` to true (idempotent)
    fn mark_restored(&self, id: &str) -> VaultResult<()>;

    /// Every blob reference known to the store
    fn content_refs(&self) -> VaultResult<HashSet<String>>;

    /// Check if a record exists for `id`
    fn contains(&self, id: &str) -> VaultResult<bool> {
        Ok(self.find_by_id(id)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // Mock implementation for testing
    struct MockMetadataStore {
        records: Mutex<HashMap<String, (ArchivedRecord, ArchivedContent)>>,
    }

    impl MetadataStore for MockMetadataStore {
        fn save(&self, record: &ArchivedRecord, content: &ArchivedContent) -> VaultResult<()> {
            self.records
                .lock()?
                .insert(record.id.clone(), (record.clone(), content.clone()));
            Ok(())
        }

        fn find_by_id(&self, id: &str) -> VaultResult<Option<(ArchivedRecord, ArchivedContent)>> {
            Ok(self.records.lock()?.get(id).cloned())
        }

        fn find_missing_notarization(&self) -> VaultResult<Vec<(ArchivedRecord, ArchivedContent)>> {
            Ok(Vec::new())
        }

        fn set_notarization_tx(&self, _id: &str, _tx_id: &str) -> VaultResult<()> {
            Ok(())
        }

        fn mark_restored(&self, id: &str) -> VaultResult<()> {
            Err(VaultError::NotFound(id.to_string()))
        }

        fn content_refs(&self) -> VaultResult<HashSet<String>> {
            Ok(HashSet::new())
        }
    }

    #[test]
    fn test_metadata_store_default_contains() {
        let store = MockMetadataStore {
            records: Mutex::new(HashMap::new()),
        };
        assert!(!store.contains("doc-1").unwrap());

        let record = ArchivedRecord::new("doc-1", Vec::new(), None);
        let content = ArchivedContent {
            content_ref_id: "ref".to_string(),
            hash_algorithm: "SHA-256".to_string(),
            hash: "00".to_string(),
            encrypted: false,
            key_version: 1,
            kdf_algorithm: "HKDF-SHA256".to_string(),
            cipher: None,
            salt: vec![0; 8],
            nonce: None,
        };
        store.save(&record, &content).unwrap();
        assert!(store.contains("doc-1").unwrap());
    }
}
