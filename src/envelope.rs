//! Ciphertext envelope: the persisted form of one encrypted value.
//!
//! Wire format 1:
//! [1 byte: format=1][4 bytes: key_version BE][12 bytes: nonce][N bytes: ciphertext][16 bytes: tag]
//!
//! The first 5 bytes are authenticated as AAD, so the version cannot be
//! swapped without failing decryption.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{PiiError, Result};
use crate::types::{
    ENVELOPE_FORMAT, ENVELOPE_HEADER_LENGTH, NONCE_LENGTH, SUPPORTED_FORMATS, TAG_LENGTH,
};

/// Minimum envelope length (empty plaintext).
pub const MIN_ENVELOPE_LENGTH: usize = ENVELOPE_HEADER_LENGTH + NONCE_LENGTH + TAG_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextEnvelope {
    pub key_version: u32,
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LENGTH],
}

impl CiphertextEnvelope {
    /// Header bytes bound into the AEAD as associated data.
    pub(crate) fn header(key_version: u32) -> [u8; ENVELOPE_HEADER_LENGTH] {
        let mut header = [0u8; ENVELOPE_HEADER_LENGTH];
        header[0] = ENVELOPE_FORMAT;
        header[1..].copy_from_slice(&key_version.to_be_bytes());
        header
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_ENVELOPE_LENGTH + self.ciphertext.len());
        out.extend_from_slice(&Self::header(self.key_version));
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse a stored envelope. Every structural problem is reported as
    /// [`PiiError::Authentication`], the same as a failed tag check.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_ENVELOPE_LENGTH || !SUPPORTED_FORMATS.contains(&bytes[0]) {
            return Err(PiiError::Authentication);
        }
        let key_version = read_version(bytes)?;

        let body = &bytes[ENVELOPE_HEADER_LENGTH..];
        let (nonce, rest) = body.split_at(NONCE_LENGTH);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LENGTH);

        let nonce: [u8; NONCE_LENGTH] = nonce.try_into().map_err(|_| PiiError::Authentication)?;
        let tag: [u8; TAG_LENGTH] = tag.try_into().map_err(|_| PiiError::Authentication)?;
        Ok(Self {
            key_version,
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }

    /// Encode for text columns.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| PiiError::Authentication)?;
        Self::from_bytes(&bytes)
    }
}

/// Read the key version from a stored envelope without decrypting it.
pub fn peek_key_version(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < ENVELOPE_HEADER_LENGTH || !SUPPORTED_FORMATS.contains(&bytes[0]) {
        return Err(PiiError::Authentication);
    }
    read_version(bytes)
}

fn read_version(bytes: &[u8]) -> Result<u32> {
    let version: [u8; 4] = bytes[1..ENVELOPE_HEADER_LENGTH]
        .try_into()
        .map_err(|_| PiiError::Authentication)?;
    Ok(u32::from_be_bytes(version))
}
