//! Filesystem blob store
//!
//! Each blob is a file named by its UUID under the store root. Writes go to a
//! hidden temporary file first and are renamed into place only after the
//! whole stream has been flushed, so a reader never observes a partial blob.

use super::traits::{BlobInfo, StoragePort};
use crate::error::{VaultError, VaultResult};
use crate::stream::ByteStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> VaultResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, content_ref_id: &str) -> VaultResult<PathBuf> {
        // Only UUIDs are valid references; anything else could escape the root.
        let id = Uuid::parse_str(content_ref_id)
            .map_err(|_| VaultError::NotFound(format!("blob {}", content_ref_id)))?;
        Ok(self.root.join(id.to_string()))
    }

    async fn write_temp(&self, temp: &Path, mut stream: ByteStream, length: Option<u64>) -> VaultResult<u64> {
        let mut file = fs::File::create(temp).await?;
        let written = tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = length {
            if written != expected {
                return Err(VaultError::Storage(format!(
                    "expected {} bytes, received {}",
                    expected, written
                )));
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl StoragePort for FsBlobStore {
    async fn put(&self, stream: ByteStream, length: Option<u64>) -> VaultResult<String> {
        let id = Uuid::new_v4().to_string();
        let temp = self.root.join(format!(".{}.tmp", id));

        match self.write_temp(&temp, stream, length).await {
            Ok(written) => {
                fs::rename(&temp, self.root.join(&id)).await?;
                debug!(target: "repository::fs", blob = %id, bytes = written, "blob stored");
                Ok(id)
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&temp).await {
                    if cleanup.kind() != ErrorKind::NotFound {
                        warn!(target: "repository::fs", path = %temp.display(), error = %cleanup, "failed to remove partial blob");
                    }
                }
                Err(err)
            }
        }
    }

    async fn get(&self, content_ref_id: &str) -> VaultResult<ByteStream> {
        let path = self.blob_path(content_ref_id)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(VaultError::NotFound(format!("blob {}", content_ref_id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, content_ref_id: &str) -> VaultResult<()> {
        let path = self.blob_path(content_ref_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(VaultError::NotFound(format!("blob {}", content_ref_id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> VaultResult<Vec<BlobInfo>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut blobs = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if Uuid::parse_str(name).is_err() {
                continue;
            }

            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let created = meta.created().or_else(|_| meta.modified())?;
            blobs.push(BlobInfo {
                content_ref_id: name.to_string(),
                created_at: DateTime::<Utc>::from(created),
            });
        }
        Ok(blobs)
    }
}
