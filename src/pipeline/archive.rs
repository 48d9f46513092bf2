use super::core::{root_cause, ArchiveOptions, ArchivePipeline, ArchiveReport, StageResult};
use crate::crypto::generate_salt;
use crate::error::{VaultError, VaultResult};
use crate::model::{ArchivedContent, ArchivedRecord, ContentObject};
use crate::stream::{ByteStream, DigestingStream, StreamTee};
use std::time::Instant;
use tracing::{debug, info, warn};

impl ArchivePipeline {
    /// Archive one content object
    ///
    /// The source stream is read exactly once. A tee feeds one branch into the
    /// digest and the other (encrypted when requested) into the blob store,
    /// both drained concurrently. Metadata is persisted only after the blob is
    /// fully stored and, when double-check is on, the digest matches the
    /// caller's expected hash.
    ///
    /// A blob stored before a later step fails stays behind as an orphan for
    /// the orphan sweep; no record points at it.
    pub async fn archive(
        &self,
        content: ContentObject,
        options: &ArchiveOptions,
    ) -> VaultResult<ArchiveReport> {
        let started = Instant::now();
        let mut stages = Vec::with_capacity(4);
        let metadata = content.metadata();
        let ContentObject {
            id, length, stream, ..
        } = content;

        if self.metadata.contains(&id)? {
            return Err(VaultError::AlreadyArchived(id));
        }
        info!(target: "pipeline::archive", id = %id, encrypt = options.encrypt, "archiving content");

        // Key material
        let stage = Instant::now();
        let salt = generate_salt().to_vec();
        let key_version = self.keys.active_version();
        let kdf_algorithm = self.keys.parameters(key_version)?.algorithm();
        let key = if options.encrypt {
            let key = self
                .keys
                .derive_for_version(self.secret.clone(), salt.clone(), key_version)
                .await?;
            stages.push(StageResult::success("derive key", stage.elapsed()));
            Some(key)
        } else {
            stages.push(StageResult::skipped("derive key"));
            None
        };

        // Tee, hash and store
        let stage = Instant::now();
        let (hash_branch, store_branch, producer) =
            StreamTee::spawn(stream, self.tee_buffer).into_parts();

        let (store_stream, nonce): (ByteStream, _) = match &key {
            Some(key) => {
                let (ciphertext, nonce) = self.ciphers.encrypt(store_branch, key)?;
                (Box::pin(ciphertext), Some(nonce))
            }
            None => (Box::pin(store_branch), None),
        };
        // Ciphertext length differs from the plaintext, so only plain blobs are length-checked.
        let stored_length = if key.is_some() { None } else { length };

        let digest = DigestingStream::new(hash_branch, self.hash_algorithm);
        let (stored, hashed) = tokio::join!(self.storage.put(store_stream, stored_length), digest.drain());
        let source_bytes = producer.join().await;

        let (content_ref_id, hash) = match (stored, hashed) {
            (Ok(content_ref_id), Ok(hash)) => (content_ref_id, hash),
            (Ok(content_ref_id), Err(err)) => {
                self.discard_blob(&id, &content_ref_id).await;
                return Err(err);
            }
            (Err(err), Ok(_)) => return Err(err),
            (Err(store_err), Err(hash_err)) => return Err(root_cause(store_err, hash_err)),
        };
        let bytes = source_bytes?;
        stages.push(StageResult::success("store", stage.elapsed()));
        debug!(target: "pipeline::archive", id = %id, blob = %content_ref_id, bytes, "blob stored");

        if let Some(expected) = length {
            if expected != bytes {
                warn!(target: "pipeline::archive", id = %id, blob = %content_ref_id, expected, bytes, "source length mismatch, blob left as orphan");
                return Err(VaultError::Storage(format!(
                    "source declared {} bytes but delivered {}",
                    expected, bytes
                )));
            }
        }

        // Verify
        let stage = Instant::now();
        match (&options.expected_hash, options.double_check) {
            (Some(expected), true) => {
                if !hash.matches(expected) {
                    warn!(
                        target: "pipeline::archive",
                        id = %id,
                        blob = %content_ref_id,
                        expected = %expected,
                        actual = %hash.value,
                        "hash mismatch, blob left as orphan"
                    );
                    return Err(VaultError::HashMismatch {
                        expected: expected.clone(),
                        actual: hash.value,
                    });
                }
                stages.push(StageResult::success("verify", stage.elapsed()));
            }
            _ => stages.push(StageResult::skipped("verify")),
        }

        // Persist metadata
        let stage = Instant::now();
        let metadata_json = serde_json::to_vec(&metadata)?;
        let (metadata_blob, metadata_nonce) = match &key {
            Some(key) => {
                let (sealed, nonce) = self.ciphers.seal(key, &metadata_json)?;
                (sealed, Some(nonce.to_vec()))
            }
            None => (metadata_json, None),
        };

        let record = ArchivedRecord::new(id.clone(), metadata_blob, metadata_nonce);
        let archived = ArchivedContent {
            content_ref_id: content_ref_id.clone(),
            hash_algorithm: hash.algorithm.clone(),
            hash: hash.value.clone(),
            encrypted: key.is_some(),
            key_version,
            kdf_algorithm: kdf_algorithm.id().to_string(),
            cipher: key.as_ref().map(|_| self.ciphers.algorithm().id().to_string()),
            salt,
            nonce: nonce.map(|n| n.to_vec()),
        };
        self.metadata.save(&record, &archived)?;
        stages.push(StageResult::success("persist metadata", stage.elapsed()));

        info!(
            target: "pipeline::archive",
            id = %id,
            blob = %content_ref_id,
            hash = %hash.value,
            bytes,
            "content archived"
        );

        Ok(ArchiveReport {
            id,
            content_ref_id,
            hash,
            bytes,
            encrypted: archived.encrypted,
            key_version,
            stages,
            total_duration: started.elapsed(),
        })
    }

    async fn discard_blob(&self, id: &str, content_ref_id: &str) {
        if let Err(err) = self.storage.delete(content_ref_id).await {
            warn!(target: "pipeline::archive", id, blob = content_ref_id, error = %err, "failed to discard blob, leaving it for the orphan sweep");
        }
    }
}
