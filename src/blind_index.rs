//! Deterministic keyed tokens for exact-match lookup.
//!
//! Token = HMAC-SHA256(index_key[v], domain || len(scope) || scope || normalized)[..16]
//!
//! Equal normalized values under the same key version and scope always
//! produce equal tokens. That is what makes lookup possible and is also the
//! leak: token frequencies mirror value frequencies. Low-entropy fields
//! (short codes, birth years) can be recovered by a dictionary attack by
//! anyone holding the index key, so only index values with a large domain.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{PiiError, Result};
use crate::key_manager::{DerivedKey, KeyManager};
use crate::normalize::NormalizationPolicy;
use crate::types::{KeyLabel, BLIND_INDEX_LENGTH, TOKEN_LENGTH};

type HmacSha256 = Hmac<Sha256>;

/// Hash domain for blind-index tokens.
pub(crate) const DOMAIN_BLIND: &[u8] = b"b";
/// Hash domain for trigram tokens.
pub(crate) const DOMAIN_TRIGRAM: &[u8] = b"t";

/// Keyed hash shared by blind-index and trigram tokens.
///
/// # Arguments
/// * `key` - Index key for the token version
/// * `domain` - Token family, keeps blind and trigram tokens disjoint
/// * `scope` - Attribute name; empty when unscoped
/// * `data` - Normalized value or shingle
pub(crate) fn keyed_hash(
    key: &DerivedKey,
    domain: &[u8],
    scope: &str,
    data: &[u8],
) -> Result<[u8; TOKEN_LENGTH]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| PiiError::KeyDerivation(e.to_string()))?;
    mac.update(domain);
    mac.update(&(scope.len() as u32).to_be_bytes());
    mac.update(scope.as_bytes());
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    let mut token = [0u8; TOKEN_LENGTH];
    token.copy_from_slice(&digest[..TOKEN_LENGTH]);
    Ok(token)
}

/// Exact-match token, tagged with the index-key version that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlindIndexToken {
    pub version: u32,
    pub tag: [u8; TOKEN_LENGTH],
}

impl BlindIndexToken {
    /// Fixed-width column form: `[version:4B BE][tag:16B]`.
    pub fn to_bytes(&self) -> [u8; BLIND_INDEX_LENGTH] {
        let mut out = [0u8; BLIND_INDEX_LENGTH];
        out[..4].copy_from_slice(&self.version.to_be_bytes());
        out[4..].copy_from_slice(&self.tag);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BLIND_INDEX_LENGTH {
            return Err(PiiError::Storage(format!(
                "blind index must be {} bytes, got {}",
                BLIND_INDEX_LENGTH,
                bytes.len()
            )));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[..4]);
        let mut tag = [0u8; TOKEN_LENGTH];
        tag.copy_from_slice(&bytes[4..]);
        Ok(Self {
            version: u32::from_be_bytes(version),
            tag,
        })
    }

    /// Fixed-width string form for text columns.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| PiiError::Storage(format!("invalid blind index encoding: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

/// Computes exact-match tokens under the index key.
#[derive(Debug, Clone)]
pub struct BlindIndexService {
    keys: Arc<KeyManager>,
    policy: NormalizationPolicy,
    scope: String,
}

impl BlindIndexService {
    pub fn new(keys: Arc<KeyManager>, policy: NormalizationPolicy) -> Self {
        Self {
            keys,
            policy,
            scope: String::new(),
        }
    }

    /// Scope tokens to one attribute so equal values in different
    /// attributes do not correlate.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    /// Token for `plaintext` under the current index version.
    pub fn index(&self, plaintext: &str) -> Result<BlindIndexToken> {
        let version = self.keys.current_version(KeyLabel::Index);
        self.index_at(plaintext, version)
    }

    /// Token for `plaintext` under a specific index version, used when
    /// querying rows that have not been re-indexed yet.
    pub fn index_at(&self, plaintext: &str, version: u32) -> Result<BlindIndexToken> {
        let normalized = self.policy.normalize(plaintext);
        self.index_normalized(&normalized, version)
    }

    pub(crate) fn index_normalized(&self, normalized: &str, version: u32) -> Result<BlindIndexToken> {
        let key = self.keys.resolve(KeyLabel::Index, version)?;
        let tag = keyed_hash(&key, DOMAIN_BLIND, &self.scope, normalized.as_bytes())?;
        Ok(BlindIndexToken { version, tag })
    }

    /// Token equality. Tokens from different versions never match.
    pub fn matches(a: &BlindIndexToken, b: &BlindIndexToken) -> bool {
        a.version == b.version && bool::from(a.tag.ct_eq(&b.tag))
    }
}
