//! Data model for archived content
//!
//! A [`ContentObject`] is what the source hands over for one archive run.
//! Archiving produces an [`ArchivedContent`] describing the stored blob and an
//! [`ArchivedRecord`] tracking the lifecycle of the archive entry.

use crate::stream::ByteStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content fetched from the source for a single archive run
///
/// The stream is consumed exactly once.
pub struct ContentObject {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub length: Option<u64>,
    /// Hex digest the source declares for the content, if it keeps one
    pub expected_hash: Option<String>,
    pub stream: ByteStream,
}

impl ContentObject {
    pub fn metadata(&self) -> ContentMetadata {
        ContentMetadata {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            length: self.length,
        }
    }
}

impl fmt::Debug for ContentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("length", &self.length)
            .field("expected_hash", &self.expected_hash)
            .finish_non_exhaustive()
    }
}

/// Descriptive fields kept in the record's metadata blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// Description of a stored blob
///
/// `hash` is always the digest of the plaintext. Salt and nonce live here,
/// beside the blob, never inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedContent {
    pub content_ref_id: String,
    pub hash_algorithm: String,
    pub hash: String,
    pub encrypted: bool,
    pub key_version: u32,
    pub kdf_algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_opt_bytes", skip_serializing_if = "Option::is_none", default)]
    pub nonce: Option<Vec<u8>>,
}

/// Lifecycle record for one archived source object
///
/// Only `restored` and `notarization_tx_id` change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub id: String,
    pub archive_timestamp: DateTime<Utc>,
    pub restored: bool,
    #[serde(with = "base64_bytes")]
    pub metadata_blob: Vec<u8>,
    #[serde(with = "base64_opt_bytes", skip_serializing_if = "Option::is_none", default)]
    pub metadata_nonce: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notarization_tx_id: Option<String>,
}

impl ArchivedRecord {
    pub fn new(id: impl Into<String>, metadata_blob: Vec<u8>, metadata_nonce: Option<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            archive_timestamp: Utc::now(),
            restored: false,
            metadata_blob,
            metadata_nonce,
            notarization_tx_id: None,
        }
    }

    pub fn is_notarized(&self) -> bool {
        self.notarization_tx_id.is_some()
    }
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) mod base64_opt_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| {
                general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
