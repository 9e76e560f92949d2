//! Wire constants and small shared types.

use serde::{Deserialize, Serialize};

/// Envelope format byte for values written by this crate.
///
/// Format 1: `[format=1:1B][key_version:4B BE][nonce:12B][ciphertext][tag:16B]`.
/// The 5-byte header is authenticated as AAD.
pub const ENVELOPE_FORMAT: u8 = 1;

/// Envelope formats accepted on decrypt.
pub const SUPPORTED_FORMATS: &[u8] = &[1];

/// Envelope header length: format byte + big-endian key version.
pub const ENVELOPE_HEADER_LENGTH: usize = 1 + 4;

/// AES-GCM nonce length in bytes (96 bits).
pub const NONCE_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const TAG_LENGTH: usize = 16;

/// Derived key length in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Minimum accepted master secret length in bytes.
pub const MIN_MASTER_SECRET_LENGTH: usize = 32;

/// Truncated HMAC-SHA256 width for index tokens (128 bits).
pub const TOKEN_LENGTH: usize = 16;

/// Encoded blind-index width: `[index_version:4B BE][tag:16B]`.
pub const BLIND_INDEX_LENGTH: usize = 4 + TOKEN_LENGTH;

/// Shingle width for partial-match indexing.
pub const SHINGLE_LENGTH: usize = 3;

/// Default upper bound on normalized characters indexed for partial search.
pub const DEFAULT_MAX_INDEXED_CHARS: usize = 256;

/// How far past the current version a stored value may reference.
/// Bounds the work a crafted envelope can trigger.
pub const MAX_VERSION_ADVANCE: u32 = 1000;

/// Domain-separation label for derived keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLabel {
    /// Value encryption keys.
    Encryption,
    /// Blind-index and trigram keys.
    Index,
}

impl KeyLabel {
    pub const ALL: [KeyLabel; 2] = [KeyLabel::Encryption, KeyLabel::Index];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyLabel::Encryption => "encryption",
            KeyLabel::Index => "index",
        }
    }
}

impl std::fmt::Display for KeyLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for binding a ciphertext to where it is stored via AAD.
/// Prevents moving a ciphertext between attributes (or records, when bound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionContext {
    /// Attribute (column) name.
    pub attribute: String,
    /// Owning record, if the caller binds ciphertexts to records.
    pub record_id: Option<String>,
}

impl EncryptionContext {
    pub fn attribute(attribute: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            record_id: None,
        }
    }

    pub fn record(attribute: &str, record_id: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            record_id: Some(record_id.to_string()),
        }
    }

    /// AAD suffix.
    /// Format: `[4 bytes: attribute length (u32 BE)][attribute UTF-8][1 byte: bound][record_id UTF-8]`
    pub(crate) fn to_aad(&self) -> Vec<u8> {
        let attribute = self.attribute.as_bytes();
        let record = self.record_id.as_deref().map(str::as_bytes);
        let mut aad = Vec::with_capacity(5 + attribute.len() + record.map_or(0, <[u8]>::len));
        aad.extend_from_slice(&(attribute.len() as u32).to_be_bytes());
        aad.extend_from_slice(attribute);
        match record {
            Some(record) => {
                aad.push(1);
                aad.extend_from_slice(record);
            }
            None => aad.push(0),
        }
        aad
    }
}
