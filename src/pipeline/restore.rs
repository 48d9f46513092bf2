use super::core::{root_cause, ArchivePipeline, RestoreReport};
use crate::crypto::DerivedKey;
use crate::error::{VaultError, VaultResult};
use crate::model::{ArchivedContent, ArchivedRecord, ContentMetadata};
use crate::stream::{ByteStream, DigestingStream, HashAlgorithm, HashInfo, StreamTee};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Decryption parameters resolved from a stored record
struct Decryption<'a> {
    key: DerivedKey,
    cipher: &'a str,
    nonce: &'a [u8],
}

impl ArchivePipeline {
    /// Restore archived content into `sink`
    ///
    /// With `verify`, the plaintext is teed into a digest computed alongside
    /// the write and compared against the archived hash. Bytes reach the sink
    /// as they are decrypted, so on any error the sink may hold a partial
    /// payload that must be discarded; the record is only marked restored
    /// after everything succeeded.
    pub async fn restore<W>(&self, id: &str, sink: &mut W, verify: bool) -> VaultResult<RestoreReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (record, content) = self
            .metadata
            .find_by_id(id)?
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        info!(target: "pipeline::restore", id, blob = %content.content_ref_id, verify, "restoring content");

        let hash_algorithm: HashAlgorithm = content.hash_algorithm.parse()?;
        let decryption = self.resolve_decryption(id, &content).await?;
        let metadata = self.open_metadata(id, &record, decryption.as_ref())?;

        let blob = self.storage.get(&content.content_ref_id).await?;
        let plaintext: ByteStream = match &decryption {
            Some(d) => Box::pin(self.ciphers.decrypt(blob, &d.key, d.nonce, d.cipher)?),
            None => blob,
        };

        let (bytes_written, hash) = if verify {
            let (bytes, hash) = self.copy_verified(plaintext, sink, hash_algorithm).await?;
            if !hash.matches(&content.hash) {
                warn!(
                    target: "pipeline::restore",
                    id,
                    expected = %content.hash,
                    actual = %hash.value,
                    "restored content does not match archived hash"
                );
                return Err(VaultError::HashMismatch {
                    expected: content.hash.clone(),
                    actual: hash.value,
                });
            }
            (bytes, Some(hash))
        } else {
            let mut plaintext = plaintext;
            (tokio::io::copy(&mut plaintext, sink).await?, None)
        };
        sink.flush().await?;

        self.metadata.mark_restored(id)?;
        info!(target: "pipeline::restore", id, bytes = bytes_written, "content restored");

        Ok(RestoreReport {
            id: id.to_string(),
            bytes_written,
            hash,
            metadata,
        })
    }

    async fn resolve_decryption<'a>(
        &self,
        id: &str,
        content: &'a ArchivedContent,
    ) -> VaultResult<Option<Decryption<'a>>> {
        if !content.encrypted {
            return Ok(None);
        }

        let params = self.keys.parameters(content.key_version)?;
        if params.algorithm().id() != content.kdf_algorithm {
            return Err(VaultError::UnsupportedAlgorithm(format!(
                "key version {} is registered for {}, record says {}",
                content.key_version,
                params.algorithm(),
                content.kdf_algorithm
            )));
        }
        let malformed = |reason: &str| VaultError::MalformedMetadata {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        let cipher = content
            .cipher
            .as_deref()
            .ok_or_else(|| malformed("encrypted content without a cipher id"))?;
        let nonce = content
            .nonce
            .as_deref()
            .ok_or_else(|| malformed("encrypted content without a nonce"))?;

        let key = self
            .keys
            .derive_for_version(self.secret.clone(), content.salt.clone(), content.key_version)
            .await?;
        debug!(target: "pipeline::restore", id, key_version = content.key_version, cipher, "key re-derived");

        Ok(Some(Decryption { key, cipher, nonce }))
    }

    fn open_metadata(
        &self,
        id: &str,
        record: &ArchivedRecord,
        decryption: Option<&Decryption<'_>>,
    ) -> VaultResult<ContentMetadata> {
        let json = match decryption {
            Some(d) => {
                let nonce = record.metadata_nonce.as_deref().ok_or_else(|| {
                    VaultError::MalformedMetadata {
                        id: id.to_string(),
                        reason: "encrypted metadata without a nonce".to_string(),
                    }
                })?;
                self.ciphers.open(d.cipher, &d.key, nonce, &record.metadata_blob)?
            }
            None => record.metadata_blob.clone(),
        };
        serde_json::from_slice(&json).map_err(|e| VaultError::MalformedMetadata {
            id: id.to_string(),
            reason: format!("metadata blob is not valid JSON: {}", e),
        })
    }

    /// Write `plaintext` to `sink` while hashing it on a tee branch
    async fn copy_verified<W>(
        &self,
        plaintext: ByteStream,
        sink: &mut W,
        algorithm: HashAlgorithm,
    ) -> VaultResult<(u64, HashInfo)>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (to_sink, to_digest, producer) = StreamTee::spawn(plaintext, self.tee_buffer).into_parts();

        // Each branch owns its reader so a failing branch releases the producer.
        let write = async move {
            let mut to_sink = to_sink;
            Ok::<_, VaultError>(tokio::io::copy(&mut to_sink, sink).await?)
        };
        let digest = DigestingStream::new(to_digest, algorithm).drain();

        let (written, hashed) = tokio::join!(write, digest);
        let produced = producer.join().await;

        match (written, hashed) {
            (Ok(written), Ok(hash)) => {
                produced?;
                Ok((written, hash))
            }
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
            (Err(write_err), Err(hash_err)) => Err(root_cause(write_err, hash_err)),
        }
    }
}
