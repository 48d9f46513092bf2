//! Streaming primitives for the archive pipeline
//!
//! Everything here moves bytes through bounded channels between tasks so a
//! payload is never held in memory as a whole:
//!
//! - [`StreamTee`] fans one reader out into two independently drained readers
//! - [`DigestingStream`] hashes every byte that passes through it
//! - [`ChannelReader`] is the `AsyncRead` end shared by the tee and the cipher tasks

pub mod channel;
pub mod digest;
pub mod tee;

pub use channel::ChannelReader;
pub use digest::{DigestingStream, HashAlgorithm, HashInfo};
pub use tee::{StreamTee, TeeProducer, DEFAULT_TEE_BUFFER};

use std::fmt;
use std::io;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Owned byte stream handed between ports and pipeline stages
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Typed failure carried inside an `io::Error` across task boundaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFault {
    /// Authenticated decryption rejected a frame
    Integrity(String),

    /// The other side of a tee went away before the stream finished
    SiblingClosed,
}

impl fmt::Display for StreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFault::Integrity(reason) => write!(f, "integrity failure: {}", reason),
            StreamFault::SiblingClosed => write!(f, "sibling stream closed before completion"),
        }
    }
}

impl std::error::Error for StreamFault {}

impl StreamFault {
    pub fn into_io(self) -> io::Error {
        let kind = match self {
            StreamFault::Integrity(_) => io::ErrorKind::InvalidData,
            StreamFault::SiblingClosed => io::ErrorKind::BrokenPipe,
        };
        io::Error::new(kind, self)
    }

    pub fn from_io(err: &io::Error) -> Option<&StreamFault> {
        err.get_ref()?.downcast_ref::<StreamFault>()
    }
}

/// Duplicate an `io::Error` for delivery to more than one reader
pub(crate) fn clone_io_error(err: &io::Error) -> io::Error {
    match StreamFault::from_io(err) {
        Some(fault) => fault.clone().into_io(),
        None => io::Error::new(err.kind(), err.to_string()),
    }
}
