use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Digest algorithms the vault can record and verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "BLAKE3")]
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha256, HashAlgorithm::Blake3];

    /// Identifier persisted alongside every artifact
    pub fn id(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Blake3 => "BLAKE3",
        }
    }

    fn start(&self) -> DigestState {
        match self {
            HashAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for HashAlgorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| VaultError::UnsupportedAlgorithm(format!("hash algorithm '{}'", s)))
    }
}

enum DigestState {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl DigestState {
    fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Sha256(hasher) => hasher.update(data),
            DigestState::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            DigestState::Sha256(hasher) => hasher.finalize().to_vec(),
            DigestState::Blake3(hasher) => hasher.finalize().as_bytes().to_vec(),
        }
    }
}

/// A computed digest and the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashInfo {
    pub algorithm: String,
    pub value: String,
}

impl HashInfo {
    /// Hash data held in memory
    pub fn from_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut state = algorithm.start();
        state.update(data);
        Self {
            algorithm: algorithm.id().to_string(),
            value: hex::encode(state.finalize()),
        }
    }

    /// Compare against a caller-supplied hex digest, ignoring case
    pub fn matches(&self, expected_hex: &str) -> bool {
        self.value.eq_ignore_ascii_case(expected_hex.trim())
    }
}

/// Pass-through reader that digests every byte it returns
///
/// The digest is only available once the inner stream has reported EOF;
/// asking earlier yields [`VaultError::IncompleteDigest`] instead of a hash
/// of whatever prefix happened to be read.
pub struct DigestingStream<R> {
    inner: R,
    algorithm: HashAlgorithm,
    state: DigestState,
    bytes_read: u64,
    drained: bool,
}

impl<R> DigestingStream<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            algorithm,
            state: algorithm.start(),
            bytes_read: 0,
            drained: false,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether the inner stream has reached EOF
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Consume the wrapper and produce the digest of everything read
    pub fn finalize_hash(self) -> VaultResult<HashInfo> {
        if !self.drained {
            return Err(VaultError::IncompleteDigest);
        }
        Ok(HashInfo {
            algorithm: self.algorithm.id().to_string(),
            value: hex::encode(self.state.finalize()),
        })
    }

    /// Read the stream to EOF, discarding the bytes, and return the digest
    pub async fn drain(mut self) -> VaultResult<HashInfo> {
        tokio::io::copy(&mut self, &mut tokio::io::sink()).await?;
        self.finalize_hash()
    }
}

impl<R> AsyncRead for DigestingStream<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;

        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let fresh = &buf.filled()[before..];
        if fresh.is_empty() {
            // A zero-byte read into a non-empty buffer is EOF.
            if had_room {
                this.drained = true;
            }
        } else {
            this.state.update(fresh);
            this.bytes_read += fresh.len() as u64;
        }
        Poll::Ready(Ok(()))
    }
}
