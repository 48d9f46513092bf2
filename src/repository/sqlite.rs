//! SQLite metadata store
//!
//! One row per archived item, holding both the record and the content
//! description. Salt and nonces are stored base64-encoded, hashes as hex.

use super::traits::MetadataStore;
use crate::error::{VaultError, VaultResult};
use crate::model::{ArchivedContent, ArchivedRecord};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS archived_records (
    id                  TEXT PRIMARY KEY,
    archive_timestamp   TEXT NOT NULL,
    restored            INTEGER NOT NULL DEFAULT 0,
    metadata_blob       BLOB NOT NULL,
    metadata_nonce      TEXT,
    notarization_tx_id  TEXT,
    content_ref_id      TEXT NOT NULL,
    hash_algorithm      TEXT NOT NULL,
    hash                TEXT NOT NULL,
    encrypted           INTEGER NOT NULL,
    key_version         INTEGER NOT NULL,
    kdf_algorithm       TEXT NOT NULL,
    cipher              TEXT,
    salt                TEXT NOT NULL,
    nonce               TEXT
);
CREATE INDEX IF NOT EXISTS idx_archived_records_unnotarized
    ON archived_records(id) WHERE notarization_tx_id IS NULL;
";

const SELECT_COLUMNS: &str = "id, archive_timestamp, restored, metadata_blob, metadata_nonce, \
     notarization_tx_id, content_ref_id, hash_algorithm, hash, encrypted, key_version, \
     kdf_algorithm, cipher, salt, nonce";

/// Columns as stored, before decoding
struct RawRow {
    id: String,
    archive_timestamp: String,
    restored: bool,
    metadata_blob: Vec<u8>,
    metadata_nonce: Option<String>,
    notarization_tx_id: Option<String>,
    content_ref_id: String,
    hash_algorithm: String,
    hash: String,
    encrypted: bool,
    key_version: i64,
    kdf_algorithm: String,
    cipher: Option<String>,
    salt: String,
    nonce: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            archive_timestamp: row.get(1)?,
            restored: row.get(2)?,
            metadata_blob: row.get(3)?,
            metadata_nonce: row.get(4)?,
            notarization_tx_id: row.get(5)?,
            content_ref_id: row.get(6)?,
            hash_algorithm: row.get(7)?,
            hash: row.get(8)?,
            encrypted: row.get(9)?,
            key_version: row.get(10)?,
            kdf_algorithm: row.get(11)?,
            cipher: row.get(12)?,
            salt: row.get(13)?,
            nonce: row.get(14)?,
        })
    }

    fn decode(self) -> VaultResult<(ArchivedRecord, ArchivedContent)> {
        let id = self.id;
        let malformed = |reason: String| VaultError::MalformedMetadata {
            id: id.clone(),
            reason,
        };
        let decode_b64 = |field: &str, value: &str| {
            general_purpose::STANDARD
                .decode(value)
                .map_err(|e| malformed(format!("{} is not base64: {}", field, e)))
        };

        let archive_timestamp = DateTime::parse_from_rfc3339(&self.archive_timestamp)
            .map_err(|e| malformed(format!("bad archive_timestamp: {}", e)))?
            .with_timezone(&Utc);
        let key_version = u32::try_from(self.key_version)
            .map_err(|_| malformed(format!("bad key_version {}", self.key_version)))?;
        let metadata_nonce = self
            .metadata_nonce
            .as_deref()
            .map(|v| decode_b64("metadata_nonce", v))
            .transpose()?;
        let salt = decode_b64("salt", &self.salt)?;
        let nonce = self
            .nonce
            .as_deref()
            .map(|v| decode_b64("nonce", v))
            .transpose()?;
        if self.encrypted && nonce.is_none() {
            return Err(malformed("encrypted content without a nonce".to_string()));
        }

        let record = ArchivedRecord {
            id: id.clone(),
            archive_timestamp,
            restored: self.restored,
            metadata_blob: self.metadata_blob,
            metadata_nonce,
            notarization_tx_id: self.notarization_tx_id,
        };
        let content = ArchivedContent {
            content_ref_id: self.content_ref_id,
            hash_algorithm: self.hash_algorithm,
            hash: self.hash,
            encrypted: self.encrypted,
            key_version,
            kdf_algorithm: self.kdf_algorithm,
            cipher: self.cipher,
            salt,
            nonce,
        };
        Ok((record, content))
    }
}

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open(path: impl AsRef<Path>) -> VaultResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> VaultResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> VaultResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn update_one(&self, sql: &str, params: impl rusqlite::Params, id: &str) -> VaultResult<()> {
        let changed = self.conn.lock()?.execute(sql, params)?;
        if changed == 0 {
            return Err(VaultError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn save(&self, record: &ArchivedRecord, content: &ArchivedContent) -> VaultResult<()> {
        let encode = |bytes: &Vec<u8>| general_purpose::STANDARD.encode(bytes);
        let conn = self.conn.lock()?;
        let result = conn.execute(
            "INSERT INTO archived_records (id, archive_timestamp, restored, metadata_blob, \
             metadata_nonce, notarization_tx_id, content_ref_id, hash_algorithm, hash, encrypted, \
             key_version, kdf_algorithm, cipher, salt, nonce) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.id,
                record.archive_timestamp.to_rfc3339(),
                record.restored,
                record.metadata_blob,
                record.metadata_nonce.as_ref().map(encode),
                record.notarization_tx_id,
                content.content_ref_id,
                content.hash_algorithm,
                content.hash,
                content.encrypted,
                content.key_version,
                content.kdf_algorithm,
                content.cipher,
                encode(&content.salt),
                content.nonce.as_ref().map(encode),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(VaultError::AlreadyArchived(record.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn find_by_id(&self, id: &str) -> VaultResult<Option<(ArchivedRecord, ArchivedContent)>> {
        let conn = self.conn.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM archived_records WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }

    fn find_missing_notarization(&self) -> VaultResult<Vec<(ArchivedRecord, ArchivedContent)>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM archived_records WHERE notarization_tx_id IS NULL ORDER BY archive_timestamp",
            SELECT_COLUMNS
        ))?;

        let mut found = Vec::new();
        for raw in stmt.query_map([], RawRow::from_row)? {
            match raw.map_err(VaultError::from).and_then(RawRow::decode) {
                Ok(entry) => found.push(entry),
                Err(err) => {
                    warn!(target: "repository::sqlite", error = %err, "skipping malformed archive record");
                }
            }
        }
        Ok(found)
    }

    fn set_notarization_tx(&self, id: &str, tx_id: &str) -> VaultResult<()> {
        self.update_one(
            "UPDATE archived_records SET notarization_tx_id = ?2 WHERE id = ?1",
            params![id, tx_id],
            id,
        )
    }

    fn mark_restored(&self, id: &str) -> VaultResult<()> {
        self.update_one(
            "UPDATE archived_records SET restored = 1 WHERE id = ?1",
            params![id],
            id,
        )
    }

    fn content_refs(&self) -> VaultResult<HashSet<String>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT content_ref_id FROM archived_records")?;
        let refs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(refs)
    }
}
