use archivault::crypto::{
    CipherAlgorithm, CipherStreamFactory, KdfAlgorithm, KdfParameters, KeyDerivationService, MasterSecret,
};
use archivault::dedup::WindowedDedupGuard;
use archivault::notary::{MockNotarizer, NotarizationPort};
use archivault::repository::{FsBlobStore, MetadataStore, SourcePort, SqliteMetadataStore, StoragePort};
use archivault::scheduler::{JobRunner, JobSettings};
use archivault::*;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const SECRET: &[u8] = b"integration-master-secret-0123456789";

struct Vault {
    dir: TempDir,
    storage: Arc<FsBlobStore>,
    metadata: Arc<SqliteMetadataStore>,
}

impl Vault {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsBlobStore::open(dir.path().join("blobs")).await.unwrap());
        let metadata = Arc::new(SqliteMetadataStore::open(dir.path().join("vault.db")).unwrap());
        Self { dir, storage, metadata }
    }

    fn pipeline(&self, keys: KeyDerivationService, cipher: CipherAlgorithm) -> ArchivePipeline {
        ArchivePipeline::new(
            self.storage.clone(),
            self.metadata.clone(),
            Arc::new(keys),
            CipherStreamFactory::new(cipher, 4096),
            Arc::new(MasterSecret::new(SECRET.to_vec()).unwrap()),
        )
    }
}

fn content(id: &str, bytes: &[u8]) -> ContentObject {
    ContentObject {
        id: id.to_string(),
        name: format!("{}.dat", id),
        mime_type: "application/octet-stream".to_string(),
        length: Some(bytes.len() as u64),
        expected_hash: None,
        stream: Box::pin(std::io::Cursor::new(bytes.to_vec())),
    }
}

/// Deterministic payload spanning several cipher chunks and tee buffers
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn kdf_variants() -> Vec<KdfParameters> {
    vec![
        KdfParameters::Pbkdf2 { iterations: 100_000 },
        KdfParameters::recommended(KdfAlgorithm::Hkdf),
        KdfParameters::recommended(KdfAlgorithm::Argon2),
    ]
}

/// Test the complete workflow: archive, restore, compare, for every cipher and KDF
#[tokio::test]
async fn test_archive_restore_round_trip_matrix() {
    let vault = Vault::new().await;
    let data = payload(50_000);
    let expected = HashInfo::from_bytes(HashAlgorithm::Sha256, &data);

    let mut n = 0;
    for kdf in kdf_variants() {
        for cipher in [None, Some(CipherAlgorithm::Aes256Gcm), Some(CipherAlgorithm::ChaCha20Poly1305)] {
            n += 1;
            let id = format!("doc-{}", n);
            let keys = KeyDerivationService::single(kdf.clone()).unwrap();
            let pipeline = vault.pipeline(keys, cipher.unwrap_or_default());
            let options = ArchiveOptions {
                encrypt: cipher.is_some(),
                double_check: true,
                expected_hash: Some(expected.value.clone()),
            };

            let report = pipeline.archive(content(&id, &data), &options).await.unwrap();
            assert_eq!(report.bytes, data.len() as u64);
            assert_eq!(report.hash, expected);
            assert_eq!(report.encrypted, cipher.is_some());
            // Key derivation is skipped for plain blobs; store, verify and persist always run.
            assert_eq!(report.executed_stages(), if cipher.is_some() { 4 } else { 3 });

            // Ciphertext at rest must not contain the plaintext.
            let stored = std::fs::read(vault.storage.root().join(&report.content_ref_id)).unwrap();
            if cipher.is_some() {
                assert_ne!(stored.len(), data.len());
                assert!(!stored.windows(64).any(|w| w == &data[..64]));
            } else {
                assert_eq!(stored, data);
            }

            let mut restored = Vec::new();
            let restore = pipeline.restore(&id, &mut restored, true).await.unwrap();
            assert_eq!(restored, data, "round trip failed for {:?} / {:?}", kdf.algorithm(), cipher);
            assert_eq!(restore.hash.as_ref(), Some(&expected));
            assert_eq!(restore.metadata.name, format!("{}.dat", id));

            let (record, _) = vault.metadata.find_by_id(&id).unwrap().unwrap();
            assert!(record.restored);
        }
    }
}

/// Test that an empty source archives and restores to an empty payload
#[tokio::test]
async fn test_empty_content_round_trip() {
    let vault = Vault::new().await;
    let pipeline = vault.pipeline(
        KeyDerivationService::single(KdfParameters::recommended(KdfAlgorithm::Hkdf)).unwrap(),
        CipherAlgorithm::Aes256Gcm,
    );
    let options = ArchiveOptions {
        encrypt: true,
        ..Default::default()
    };

    let report = pipeline.archive(content("empty", b""), &options).await.unwrap();
    assert_eq!(report.bytes, 0);
    assert_eq!(
        report.hash.value,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );

    let mut restored = Vec::new();
    pipeline.restore("empty", &mut restored, true).await.unwrap();
    assert!(restored.is_empty());
}

/// Test that a double-check mismatch leaves no record behind
#[tokio::test]
async fn test_double_check_mismatch_persists_nothing() {
    let vault = Vault::new().await;
    let pipeline = vault.pipeline(
        KeyDerivationService::single(KdfParameters::recommended(KdfAlgorithm::Hkdf)).unwrap(),
        CipherAlgorithm::Aes256Gcm,
    );
    let options = ArchiveOptions {
        encrypt: true,
        double_check: true,
        expected_hash: Some("00".repeat(32)),
    };

    let result = pipeline.archive(content("doc-1", b"hello vault"), &options).await;
    match result {
        Err(VaultError::HashMismatch { expected, actual }) => {
            assert_eq!(expected, "00".repeat(32));
            assert_eq!(actual, HashInfo::from_bytes(HashAlgorithm::Sha256, b"hello vault").value);
        }
        other => panic!("expected HashMismatch, got {:?}", other),
    }
    assert!(!vault.metadata.contains("doc-1").unwrap());

    // The stored blob is an orphan until the sweep collects it.
    assert_eq!(vault.storage.list().await.unwrap().len(), 1);
    assert!(vault.metadata.content_refs().unwrap().is_empty());
}

/// Test that artifacts written under an old key version stay restorable after rotation
#[tokio::test]
async fn test_key_rotation_keeps_old_artifacts_readable() {
    let vault = Vault::new().await;
    let v1 = KdfParameters::recommended(KdfAlgorithm::Hkdf);
    let v2 = KdfParameters::Pbkdf2 { iterations: 100_000 };
    let options = ArchiveOptions {
        encrypt: true,
        ..Default::default()
    };

    let before = vault.pipeline(KeyDerivationService::single(v1.clone()).unwrap(), CipherAlgorithm::Aes256Gcm);
    before.archive(content("old", b"written under v1"), &options).await.unwrap();

    let rotated = vault.pipeline(
        KeyDerivationService::new([(1, v1), (2, v2)], 2).unwrap(),
        CipherAlgorithm::ChaCha20Poly1305,
    );
    let report = rotated.archive(content("new", b"written under v2"), &options).await.unwrap();
    assert_eq!(report.key_version, 2);

    let mut old = Vec::new();
    rotated.restore("old", &mut old, true).await.unwrap();
    assert_eq!(old, b"written under v1");

    let mut new = Vec::new();
    rotated.restore("new", &mut new, true).await.unwrap();
    assert_eq!(new, b"written under v2");

    let (_, old_content) = vault.metadata.find_by_id("old").unwrap().unwrap();
    assert_eq!(old_content.key_version, 1);
    assert_eq!(old_content.cipher.as_deref(), Some("AES-256-GCM"));
}

/// Test that an unknown stored cipher id is refused instead of guessed
#[tokio::test]
async fn test_unknown_stored_cipher_is_unsupported() {
    let vault = Vault::new().await;
    let pipeline = vault.pipeline(
        KeyDerivationService::single(KdfParameters::recommended(KdfAlgorithm::Hkdf)).unwrap(),
        CipherAlgorithm::Aes256Gcm,
    );
    let options = ArchiveOptions {
        encrypt: true,
        ..Default::default()
    };
    pipeline.archive(content("doc-1", b"payload"), &options).await.unwrap();

    let conn = Connection::open(vault.dir.path().join("vault.db")).unwrap();
    conn.execute(
        "UPDATE archived_records SET cipher = ?1 WHERE id = ?2",
        params!["XTEA-CBC", "doc-1"],
    )
    .unwrap();
    drop(conn);

    let mut sink = Vec::new();
    let result = pipeline.restore("doc-1", &mut sink, true).await;
    assert!(matches!(result, Err(VaultError::UnsupportedAlgorithm(_))), "got {:?}", result);
}

/// Test that a tampered blob fails restore with an integrity error
#[tokio::test]
async fn test_tampered_blob_fails_restore() {
    let vault = Vault::new().await;
    let pipeline = vault.pipeline(
        KeyDerivationService::single(KdfParameters::recommended(KdfAlgorithm::Hkdf)).unwrap(),
        CipherAlgorithm::ChaCha20Poly1305,
    );
    let options = ArchiveOptions {
        encrypt: true,
        ..Default::default()
    };
    let data = payload(10_000);
    let report = pipeline.archive(content("doc-1", &data), &options).await.unwrap();

    let path = vault.storage.root().join(&report.content_ref_id);
    let mut blob = std::fs::read(&path).unwrap();
    let middle = blob.len() / 2;
    blob[middle] ^= 0x01;
    std::fs::write(&path, blob).unwrap();

    let mut sink = Vec::new();
    let result = pipeline.restore("doc-1", &mut sink, true).await;
    assert!(matches!(result, Err(VaultError::IntegrityError(_))), "got {:?}", result);

    let (record, _) = vault.metadata.find_by_id("doc-1").unwrap().unwrap();
    assert!(!record.restored);
}

fn hkdf_pipeline(vault: &Vault, cipher: CipherAlgorithm) -> ArchivePipeline {
    vault.pipeline(
        KeyDerivationService::single(KdfParameters::recommended(KdfAlgorithm::Hkdf)).unwrap(),
        cipher,
    )
}

/// Test that restoring an id with no record fails with NotFound
#[tokio::test]
async fn test_restore_unknown_id_is_not_found() {
    let vault = Vault::new().await;
    let pipeline = hkdf_pipeline(&vault, CipherAlgorithm::Aes256Gcm);

    let mut sink = Vec::new();
    let result = pipeline.restore("ghost", &mut sink, true).await;
    assert!(matches!(result, Err(VaultError::NotFound(ref id)) if id == "ghost"), "got {:?}", result);
    assert!(sink.is_empty());
}

/// Test that a modified plain blob fails verified restore with HashMismatch
#[tokio::test]
async fn test_tampered_plain_blob_fails_verification() {
    let vault = Vault::new().await;
    let pipeline = hkdf_pipeline(&vault, CipherAlgorithm::Aes256Gcm);
    let data = payload(20_000);
    let report = pipeline
        .archive(content("doc-1", &data), &ArchiveOptions::default())
        .await
        .unwrap();
    assert!(!report.encrypted);

    let path = vault.storage.root().join(&report.content_ref_id);
    let mut blob = std::fs::read(&path).unwrap();
    blob[12_345] ^= 0x80;
    std::fs::write(&path, blob).unwrap();

    let mut sink = Vec::new();
    let result = pipeline.restore("doc-1", &mut sink, true).await;
    match result {
        Err(VaultError::HashMismatch { expected, actual }) => {
            assert_eq!(expected, report.hash.value);
            assert_ne!(actual, report.hash.value);
        }
        other => panic!("expected HashMismatch, got {:?}", other),
    }

    let (record, _) = vault.metadata.find_by_id("doc-1").unwrap().unwrap();
    assert!(!record.restored);

    // Without verification the altered bytes are delivered as stored.
    let mut unverified = Vec::new();
    pipeline.restore("doc-1", &mut unverified, false).await.unwrap();
    assert_eq!(unverified.len(), data.len());
    assert_ne!(unverified, data);
}

/// Blob store that accepts a little data and then fails
struct FailingStore {
    accept: usize,
}

#[async_trait]
impl StoragePort for FailingStore {
    async fn put(&self, mut stream: archivault::stream::ByteStream, _length: Option<u64>) -> VaultResult<String> {
        use tokio::io::AsyncReadExt;
        let mut taken = vec![0u8; self.accept];
        stream.read_exact(&mut taken).await?;
        Err(VaultError::Storage("disk full".to_string()))
    }

    async fn get(&self, content_ref_id: &str) -> VaultResult<archivault::stream::ByteStream> {
        Err(VaultError::NotFound(content_ref_id.to_string()))
    }

    async fn delete(&self, _content_ref_id: &str) -> VaultResult<()> {
        Ok(())
    }

    async fn list(&self) -> VaultResult<Vec<archivault::repository::BlobInfo>> {
        Ok(Vec::new())
    }
}

/// Test that a failing blob store surfaces its own error instead of a tee teardown error
#[tokio::test]
async fn test_store_failure_reports_root_cause() {
    let metadata = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
    let pipeline = ArchivePipeline::new(
        Arc::new(FailingStore { accept: 10_000 }),
        metadata.clone(),
        Arc::new(KeyDerivationService::single(KdfParameters::recommended(KdfAlgorithm::Hkdf)).unwrap()),
        CipherStreamFactory::new(CipherAlgorithm::Aes256Gcm, 4096),
        Arc::new(MasterSecret::new(SECRET.to_vec()).unwrap()),
    );
    let options = ArchiveOptions {
        encrypt: true,
        ..Default::default()
    };

    let archive = pipeline.archive(content("big", &payload(1024 * 1024)), &options);
    let result = tokio::time::timeout(std::time::Duration::from_secs(5), archive)
        .await
        .expect("archive must not hang when the store fails");
    assert!(matches!(result, Err(VaultError::Storage(ref msg)) if msg == "disk full"), "got {:?}", result);
    assert!(!metadata.contains("big").unwrap());
}

/// Sink that accepts a fixed number of bytes and then breaks
struct BrokenSink {
    remaining: usize,
}

impl tokio::io::AsyncWrite for BrokenSink {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        if self.remaining == 0 {
            return std::task::Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "sink broke")));
        }
        let n = buf.len().min(self.remaining);
        self.remaining -= n;
        std::task::Poll::Ready(Ok(n))
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// Test that a failing sink aborts a verified restore with the sink's error
#[tokio::test]
async fn test_sink_failure_reports_root_cause() {
    let vault = Vault::new().await;
    let pipeline = hkdf_pipeline(&vault, CipherAlgorithm::ChaCha20Poly1305);
    let options = ArchiveOptions {
        encrypt: true,
        ..Default::default()
    };
    pipeline.archive(content("doc-1", &payload(500_000)), &options).await.unwrap();

    let mut sink = BrokenSink { remaining: 50_000 };
    let restore = pipeline.restore("doc-1", &mut sink, true);
    let result = tokio::time::timeout(std::time::Duration::from_secs(5), restore)
        .await
        .expect("restore must not hang when the sink fails");
    match result {
        Err(VaultError::Io(err)) => {
            assert_eq!(err.kind(), std::io::ErrorKind::Other);
            assert!(err.to_string().contains("sink broke"));
        }
        other => panic!("expected the sink error, got {:?}", other),
    }

    let (record, _) = vault.metadata.find_by_id("doc-1").unwrap().unwrap();
    assert!(!record.restored);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn restore_returns_what_was_archived(
            data in proptest::collection::vec(any::<u8>(), 0..20_000),
            cipher in prop_oneof![
                Just(None),
                Just(Some(CipherAlgorithm::Aes256Gcm)),
                Just(Some(CipherAlgorithm::ChaCha20Poly1305)),
            ],
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let restored = runtime.block_on(async {
                let vault = Vault::new().await;
                let pipeline = hkdf_pipeline(&vault, cipher.unwrap_or_default());
                let options = ArchiveOptions {
                    encrypt: cipher.is_some(),
                    double_check: true,
                    expected_hash: Some(HashInfo::from_bytes(HashAlgorithm::Sha256, &data).value),
                };
                pipeline.archive(content("item", &data), &options).await.unwrap();

                let mut restored = Vec::new();
                pipeline.restore("item", &mut restored, true).await.unwrap();
                restored
            });
            prop_assert_eq!(restored, data);
        }
    }
}

/// Source backed by an in-memory map
#[derive(Default)]
struct MapSource {
    items: Mutex<BTreeMap<String, Vec<u8>>>,
}

#[async_trait]
impl SourcePort for MapSource {
    async fn fetch_content(&self, id: &str) -> VaultResult<ContentObject> {
        let bytes = self
            .items
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        Ok(content(id, &bytes))
    }

    async fn list_flagged_for_archiving(&self, _query: &str) -> VaultResult<Vec<String>> {
        Ok(self.items.lock().unwrap().keys().cloned().collect())
    }

    async fn mark_archived(&self, _id: &str) -> VaultResult<()> {
        Ok(())
    }

    async fn delete(&self, id: &str) -> VaultResult<()> {
        self.items.lock().unwrap().remove(id);
        Ok(())
    }
}

/// Test the scheduled path: archive sweep, then notarization with one failing item
#[tokio::test]
async fn test_sweeps_archive_and_notarize() {
    let vault = Vault::new().await;
    let source = Arc::new(MapSource::default());
    for i in 0..5 {
        source
            .items
            .lock()
            .unwrap()
            .insert(format!("item-{}", i), payload(1000 + i * 700));
    }

    let pipeline = vault.pipeline(
        KeyDerivationService::single(KdfParameters::recommended(KdfAlgorithm::Hkdf)).unwrap(),
        CipherAlgorithm::Aes256Gcm,
    );
    let notarizer = Arc::new(MockNotarizer::instant());
    notarizer.fail_on("item-3").unwrap();

    let config = VaultConfig {
        delete_source_after_archive: true,
        worker_count: 3,
        ..Default::default()
    };
    let runner = JobRunner::new(
        source.clone(),
        Arc::new(pipeline),
        notarizer.clone() as Arc<dyn NotarizationPort>,
        Arc::new(WindowedDedupGuard::new(config.dedup_threshold())),
        JobSettings::from_config(&config),
    );

    let archived = runner.archive_sweep().await.unwrap().unwrap();
    assert_eq!(archived.succeeded, 5);
    assert!(source.items.lock().unwrap().is_empty());

    let notarized = runner.notarization_sweep().await.unwrap().unwrap();
    assert_eq!(notarized.succeeded, 4);
    assert_eq!(notarized.failed, 1);
    assert_eq!(notarizer.calls(), 5);

    let pending = vault.metadata.find_missing_notarization().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0.id, "item-3");

    // Nothing left to archive; the next sweep is a no-op.
    let again = runner.archive_sweep().await.unwrap().unwrap();
    assert_eq!(again.processed, 0);

    // Stored blobs all belong to records.
    let orphans = runner.orphan_sweep().await.unwrap().unwrap();
    assert_eq!(orphans.processed, 0);
    assert_eq!(vault.storage.list().await.unwrap().len(), 5);

    // Restores still verify after the scheduled path.
    let mut sink = Vec::new();
    runner
        .pipeline()
        .restore("item-2", &mut sink, true)
        .await
        .unwrap();
    assert_eq!(sink, payload(1000 + 2 * 700));
}
