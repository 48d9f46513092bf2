use super::kdf::DerivedKey;
use crate::error::{VaultError, VaultResult};
use crate::stream::channel::{ChannelReader, Chunk};
use crate::stream::StreamFault;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::debug;

// Constants
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

// Frame header: ciphertext length (u32 BE) followed by the final-chunk flag.
const FRAME_HEADER_SIZE: usize = 5;
const METADATA_AAD: &[u8] = b"archivault/metadata/v1";

/// Authenticated ciphers available for content encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
    #[serde(rename = "CHACHA20-POLY1305")]
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    pub const ALL: [CipherAlgorithm; 2] = [CipherAlgorithm::Aes256Gcm, CipherAlgorithm::ChaCha20Poly1305];

    pub fn id(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "AES-256-GCM",
            CipherAlgorithm::ChaCha20Poly1305 => "CHACHA20-POLY1305",
        }
    }
}

impl Default for CipherAlgorithm {
    fn default() -> Self {
        CipherAlgorithm::Aes256Gcm
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CipherAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| VaultError::UnsupportedAlgorithm(format!("cipher '{}'", s)))
    }
}

enum AeadCipher {
    Aes(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl AeadCipher {
    fn new(algorithm: CipherAlgorithm, key: &DerivedKey) -> VaultResult<Self> {
        let key = key.as_bytes();
        let cipher = match algorithm {
            CipherAlgorithm::Aes256Gcm => AeadCipher::Aes(Box::new(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?,
            )),
            CipherAlgorithm::ChaCha20Poly1305 => AeadCipher::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(key)
                    .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?,
            )),
        };
        Ok(cipher)
    }

    fn seal(&self, nonce: &[u8; NONCE_SIZE], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, aes_gcm::aead::Error> {
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload { msg, aad };
        match self {
            AeadCipher::Aes(cipher) => cipher.encrypt(nonce, payload),
            AeadCipher::ChaCha(cipher) => cipher.encrypt(nonce, payload),
        }
    }

    fn open(&self, nonce: &[u8; NONCE_SIZE], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, aes_gcm::aead::Error> {
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload { msg, aad };
        match self {
            AeadCipher::Aes(cipher) => cipher.decrypt(nonce, payload),
            AeadCipher::ChaCha(cipher) => cipher.decrypt(nonce, payload),
        }
    }
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Per-chunk nonce: the artifact's base nonce with the chunk index folded into its last 8 bytes
fn chunk_nonce(base: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (byte, counter) in nonce[NONCE_SIZE - 8..].iter_mut().zip(index.to_be_bytes()) {
        *byte ^= counter;
    }
    nonce
}

fn chunk_aad(index: u64, is_final: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8] = is_final as u8;
    aad
}

fn integrity(reason: impl Into<String>) -> io::Error {
    StreamFault::Integrity(reason.into()).into_io()
}

fn parse_nonce(nonce: &[u8]) -> VaultResult<[u8; NONCE_SIZE]> {
    nonce.try_into().map_err(|_| {
        VaultError::IntegrityError(format!(
            "nonce must be {} bytes, got {}",
            NONCE_SIZE,
            nonce.len()
        ))
    })
}

/// Wraps streams in chunked authenticated encryption
///
/// Ciphertext layout is a sequence of frames, one per plaintext chunk:
///
/// ```text
/// [len: u32 BE][final: u8][ciphertext || tag]
/// ```
///
/// Each chunk is sealed under a nonce derived from the artifact's random base
/// nonce and the chunk index, with the index and final flag as associated
/// data. Reordered, truncated, or extended streams therefore fail to
/// authenticate. The last frame always carries the final flag and may be
/// empty when the plaintext is a multiple of the chunk size.
///
/// Encryption and decryption each run in their own task and hand frames to
/// the returned reader through a bounded channel.
#[derive(Debug, Clone)]
pub struct CipherStreamFactory {
    algorithm: CipherAlgorithm,
    chunk_size: usize,
}

impl CipherStreamFactory {
    pub fn new(algorithm: CipherAlgorithm, chunk_size: usize) -> Self {
        Self {
            algorithm,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    /// Algorithm used for new encryptions
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Encrypt `plaintext`, returning the ciphertext stream and the fresh base nonce to persist
    pub fn encrypt<R>(&self, plaintext: R, key: &DerivedKey) -> VaultResult<(ChannelReader, [u8; NONCE_SIZE])>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let cipher = AeadCipher::new(self.algorithm, key)?;
        let nonce = random_nonce();
        let (tx, reader) = ChannelReader::channel(1);
        tokio::spawn(encrypt_frames(plaintext, cipher, nonce, self.chunk_size, tx));
        Ok((reader, nonce))
    }

    /// Decrypt a stream produced by [`encrypt`](Self::encrypt) with `algorithm_id`
    ///
    /// Authentication failures surface from the returned reader as
    /// [`StreamFault::Integrity`], which converts to [`VaultError::IntegrityError`].
    pub fn decrypt<R>(
        &self,
        ciphertext: R,
        key: &DerivedKey,
        nonce: &[u8],
        algorithm_id: &str,
    ) -> VaultResult<ChannelReader>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let algorithm: CipherAlgorithm = algorithm_id.parse()?;
        let nonce = parse_nonce(nonce)?;
        let cipher = AeadCipher::new(algorithm, key)?;
        let (tx, reader) = ChannelReader::channel(1);
        tokio::spawn(decrypt_frames(ciphertext, cipher, nonce, tx));
        Ok(reader)
    }

    /// Seal a small in-memory value under its own fresh nonce
    pub fn seal(&self, key: &DerivedKey, plaintext: &[u8]) -> VaultResult<(Vec<u8>, [u8; NONCE_SIZE])> {
        let cipher = AeadCipher::new(self.algorithm, key)?;
        let nonce = random_nonce();
        let sealed = cipher
            .seal(&nonce, plaintext, METADATA_AAD)
            .map_err(|_| VaultError::EncryptionFailed("failed to seal metadata".to_string()))?;
        Ok((sealed, nonce))
    }

    /// Open a value produced by [`seal`](Self::seal)
    pub fn open(
        &self,
        algorithm_id: &str,
        key: &DerivedKey,
        nonce: &[u8],
        sealed: &[u8],
    ) -> VaultResult<Vec<u8>> {
        let algorithm: CipherAlgorithm = algorithm_id.parse()?;
        let nonce = parse_nonce(nonce)?;
        AeadCipher::new(algorithm, key)?
            .open(&nonce, sealed, METADATA_AAD)
            .map_err(|_| {
                VaultError::IntegrityError("metadata failed authentication".to_string())
            })
    }
}

async fn read_full<R>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn encrypt_frames<R>(
    mut plaintext: R,
    cipher: AeadCipher,
    base_nonce: [u8; NONCE_SIZE],
    chunk_size: usize,
    tx: mpsc::Sender<Chunk>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; chunk_size];
    let mut index: u64 = 0;

    loop {
        let filled = tokio::select! {
            read = read_full(&mut plaintext, &mut buffer) => read,
            _ = tx.closed() => {
                debug!(target: "crypto::cipher", chunk = index, "ciphertext reader dropped, stopping encryption");
                return;
            }
        };
        let filled = match filled {
            Ok(n) => n,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        let is_final = filled < chunk_size;
        let sealed = match cipher.seal(
            &chunk_nonce(&base_nonce, index),
            &buffer[..filled],
            &chunk_aad(index, is_final),
        ) {
            Ok(sealed) => sealed,
            Err(_) => {
                let _ = tx
                    .send(Err(io::Error::new(io::ErrorKind::Other, "chunk encryption failed")))
                    .await;
                return;
            }
        };

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + sealed.len());
        frame.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
        frame.push(is_final as u8);
        frame.extend_from_slice(&sealed);

        if tx.send(Ok(frame)).await.is_err() || is_final {
            return;
        }
        index += 1;
    }
}

/// Read a frame header, returning `None` on a clean EOF before the first byte
async fn read_header<R>(reader: &mut R) -> io::Result<Option<[u8; FRAME_HEADER_SIZE]>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let filled = read_full(reader, &mut header).await?;
    match filled {
        0 => Ok(None),
        FRAME_HEADER_SIZE => Ok(Some(header)),
        _ => Err(integrity("truncated frame header")),
    }
}

async fn next_plaintext<R>(
    reader: &mut R,
    cipher: &AeadCipher,
    base_nonce: &[u8; NONCE_SIZE],
    index: u64,
) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let header = read_header(reader)
        .await?
        .ok_or_else(|| integrity("ciphertext ended before the final chunk"))?;

    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let is_final = match header[4] {
        0 => false,
        1 => true,
        _ => return Err(integrity(format!("invalid frame flag in chunk {}", index))),
    };
    if !(TAG_SIZE..=MAX_CHUNK_SIZE + TAG_SIZE).contains(&len) {
        return Err(integrity(format!("invalid frame length {} in chunk {}", len, index)));
    }

    let mut sealed = vec![0u8; len];
    if read_full(reader, &mut sealed).await? != len {
        return Err(integrity(format!("truncated frame in chunk {}", index)));
    }

    let plaintext = cipher
        .open(&chunk_nonce(base_nonce, index), &sealed, &chunk_aad(index, is_final))
        .map_err(|_| integrity(format!("chunk {} failed authentication", index)))?;
    Ok((plaintext, is_final))
}

async fn decrypt_frames<R>(
    mut ciphertext: R,
    cipher: AeadCipher,
    base_nonce: [u8; NONCE_SIZE],
    tx: mpsc::Sender<Chunk>,
) where
    R: AsyncRead + Unpin,
{
    let mut index: u64 = 0;

    loop {
        let next = tokio::select! {
            next = next_plaintext(&mut ciphertext, &cipher, &base_nonce, index) => next,
            _ = tx.closed() => return,
        };
        let (plaintext, is_final) = match next {
            Ok(frame) => frame,
            Err(err) => {
                debug!(target: "crypto::cipher", chunk = index, error = %err, "decryption stopped");
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        if !plaintext.is_empty() && tx.send(Ok(plaintext)).await.is_err() {
            return;
        }

        if is_final {
            let mut probe = [0u8; 1];
            match ciphertext.read(&mut probe).await {
                Ok(0) => {}
                Ok(_) => {
                    let _ = tx.send(Err(integrity("trailing data after final chunk"))).await;
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                }
            }
            return;
        }
        index += 1;
    }
}
