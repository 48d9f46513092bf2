use crate::stream::StreamFault;
use thiserror::Error;

/// Central error type for the archive vault
#[derive(Error, Debug)]
pub enum VaultError {
    // ============================================================================
    // Archive / Restore Errors
    // ============================================================================
    #[error("Archived content not found: {0}")]
    NotFound(String),

    #[error("Content already archived: {0}")]
    AlreadyArchived(String),

    #[error("Hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    #[error("Digest requested before the stream was fully drained")]
    IncompleteDigest,

    // ============================================================================
    // Crypto Errors
    // ============================================================================
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid key derivation parameters: {0}")]
    InvalidKdfParameters(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid master secret: {0}")]
    InvalidSecret(String),

    // ============================================================================
    // Collaborator Errors
    // ============================================================================
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed metadata for {id}: {reason}")]
    MalformedMetadata { id: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mutex lock error")]
    LockError,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Stream readers run in their own tasks and can only report through io::Error;
// recover the typed fault they carried so callers still see IntegrityError.
impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        match StreamFault::from_io(&err) {
            Some(StreamFault::Integrity(reason)) => VaultError::IntegrityError(reason.clone()),
            _ => VaultError::Io(err),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for VaultError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        VaultError::LockError
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        VaultError::Internal(format!("Background task failed: {}", err))
    }
}

// Helper type alias for Results
pub type VaultResult<T> = Result<T, VaultError>;
