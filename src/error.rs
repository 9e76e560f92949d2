use thiserror::Error;

use crate::types::KeyLabel;

pub type Result<T> = std::result::Result<T, PiiError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PiiError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Tag mismatch, wrong key, malformed envelope: deliberately one variant.
    #[error("Value could not be authenticated")]
    Authentication,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Input too long: {len} characters exceeds the indexing limit of {max}")]
    InputTooLong { len: usize, max: usize },

    #[error("No {label} key available for version {version}")]
    KeyUnavailable { label: KeyLabel, version: u32 },

    #[error("Random number generation failed: {0}")]
    Rng(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse classification callers use to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at startup; nothing should run.
    Configuration,
    /// The value is unavailable. Never retry.
    Integrity,
    /// The caller's input was rejected before any cryptographic work.
    Input,
    /// Fatal for one value or operation, not for the process.
    Operational,
}

impl PiiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PiiError::KeyDerivation(_) | PiiError::Config(_) => ErrorKind::Configuration,
            PiiError::Authentication => ErrorKind::Integrity,
            PiiError::InvalidQuery(_) | PiiError::InputTooLong { .. } => ErrorKind::Input,
            PiiError::KeyUnavailable { .. }
            | PiiError::Rng(_)
            | PiiError::EncryptionFailed(_)
            | PiiError::Storage(_) => ErrorKind::Operational,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PiiError {
    fn from(err: rusqlite::Error) -> Self {
        PiiError::Storage(err.to_string())
    }
}
