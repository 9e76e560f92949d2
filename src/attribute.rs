//! Encrypted attribute facade.
//!
//! Composes encryption, blind indexing and trigram indexing behind a single
//! store / load / rebuild contract for one named attribute. Callers never see
//! key material or derivation state.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::blind_index::{BlindIndexService, BlindIndexToken};
use crate::config::VaultConfig;
use crate::encryption::EncryptionService;
use crate::envelope::CiphertextEnvelope;
use crate::error::{PiiError, Result};
use crate::key_manager::KeyManager;
use crate::normalize::NormalizationPolicy;
use crate::trigram::{TrigramIndexService, TrigramTokenSet};
use crate::types::{EncryptionContext, KeyLabel, DEFAULT_MAX_INDEXED_CHARS};

/// Which searches a stored value supports. Each step up leaks more: `exact`
/// reveals equal values, `partial` also reveals shared 3-character runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchCapability {
    /// Ciphertext only.
    #[default]
    None,
    /// Ciphertext and blind index.
    Exact,
    /// Ciphertext, blind index and trigram set.
    Partial,
}

impl SearchCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchCapability::None => "none",
            SearchCapability::Exact => "exact",
            SearchCapability::Partial => "partial",
        }
    }

    pub fn supports_exact(&self) -> bool {
        matches!(self, SearchCapability::Exact | SearchCapability::Partial)
    }

    pub fn supports_partial(&self) -> bool {
        matches!(self, SearchCapability::Partial)
    }
}

impl FromStr for SearchCapability {
    type Err = PiiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(SearchCapability::None),
            "exact" => Ok(SearchCapability::Exact),
            "partial" => Ok(SearchCapability::Partial),
            other => Err(PiiError::Config(format!(
                "unknown search capability \"{}\"",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SearchCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything persisted for one attribute value. The sibling columns are
/// always written together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub capability: SearchCapability,
    pub envelope: CiphertextEnvelope,
    pub blind_index: Option<BlindIndexToken>,
    pub trigrams: Option<TrigramTokenSet>,
}

impl StoredValue {
    /// Index-key version of the stored tokens, if the value has any.
    pub fn index_version(&self) -> Option<u32> {
        self.blind_index
            .as_ref()
            .map(|t| t.version)
            .or_else(|| self.trigrams.as_ref().map(|t| t.version))
    }

    pub fn key_version(&self) -> u32 {
        self.envelope.key_version
    }
}

/// Per-attribute settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeOptions {
    pub policy: NormalizationPolicy,
    pub max_indexed_chars: usize,
}

impl Default for AttributeOptions {
    fn default() -> Self {
        Self {
            policy: NormalizationPolicy::default(),
            max_indexed_chars: DEFAULT_MAX_INDEXED_CHARS,
        }
    }
}

impl From<&VaultConfig> for AttributeOptions {
    fn from(config: &VaultConfig) -> Self {
        Self {
            policy: config.normalization,
            max_indexed_chars: config.max_indexed_chars,
        }
    }
}

impl AttributeOptions {
    pub fn with_policy(mut self, policy: NormalizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_indexed_chars(mut self, max: usize) -> Self {
        self.max_indexed_chars = max;
        self
    }
}

/// One protected attribute (column) of a record type.
#[derive(Debug, Clone)]
pub struct EncryptedAttribute {
    name: String,
    context: EncryptionContext,
    keys: Arc<KeyManager>,
    encryption: EncryptionService,
    blind: BlindIndexService,
    trigram: TrigramIndexService,
}

impl EncryptedAttribute {
    /// # Arguments
    /// * `keys` - Shared key manager
    /// * `name` - Attribute name; ciphertexts and tokens are bound to it
    /// * `options` - Normalization policy and trigram bound
    pub fn new(keys: Arc<KeyManager>, name: &str, options: AttributeOptions) -> Self {
        Self {
            name: name.to_string(),
            context: EncryptionContext::attribute(name),
            encryption: EncryptionService::new(keys.clone()),
            blind: BlindIndexService::new(keys.clone(), options.policy).with_scope(name),
            trigram: TrigramIndexService::new(keys.clone(), options.policy, options.max_indexed_chars)
                .with_scope(name),
            keys,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> NormalizationPolicy {
        self.blind.policy()
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypt `plaintext` and derive the tokens `capability` asks for.
    ///
    /// The envelope holds the value as given; every token is derived from
    /// its normalized form. Nothing is encrypted when indexing would fail.
    pub fn store(&self, plaintext: &str, capability: SearchCapability) -> Result<StoredValue> {
        let (blind_index, trigrams) = self.derive_indexes(plaintext, capability)?;
        let envelope = self
            .encryption
            .encrypt(plaintext.as_bytes(), Some(&self.context))?;
        Ok(StoredValue {
            capability,
            envelope,
            blind_index,
            trigrams,
        })
    }

    /// Decrypt a stored value.
    pub fn load(&self, stored: &StoredValue) -> Result<String> {
        self.decrypt(&stored.envelope)
    }

    fn decrypt(&self, envelope: &CiphertextEnvelope) -> Result<String> {
        let bytes = self.encryption.decrypt(envelope, Some(&self.context))?;
        // A valid tag over non-UTF-8 bytes was not written by `store`.
        String::from_utf8(bytes).map_err(|_| PiiError::Authentication)
    }

    /// Regenerate tokens under the current index version from a plaintext
    /// the caller already holds. The envelope is carried over untouched.
    pub fn rebuild_indexes(&self, stored: &StoredValue, plaintext: &str) -> Result<StoredValue> {
        let (blind_index, trigrams) = self.derive_indexes(plaintext, stored.capability)?;
        Ok(StoredValue {
            capability: stored.capability,
            envelope: stored.envelope.clone(),
            blind_index,
            trigrams,
        })
    }

    /// Decrypt and regenerate tokens in one step.
    pub fn refresh_indexes(&self, stored: &StoredValue) -> Result<StoredValue> {
        let plaintext = Zeroizing::new(self.load(stored)?);
        self.rebuild_indexes(stored, &plaintext)
    }

    /// Move the envelope to the current encryption version, keeping tokens.
    /// Returns `None` when it is already current.
    pub fn reencrypt(&self, stored: &StoredValue) -> Result<Option<StoredValue>> {
        let envelope = self
            .encryption
            .reencrypt(&stored.envelope, Some(&self.context))?;
        Ok(envelope.map(|envelope| StoredValue {
            envelope,
            ..stored.clone()
        }))
    }

    pub fn needs_reindex(&self, stored: &StoredValue) -> bool {
        match stored.index_version() {
            Some(version) => version != self.keys.current_version(KeyLabel::Index),
            None => stored.capability != SearchCapability::None,
        }
    }

    pub fn needs_reencrypt(&self, stored: &StoredValue) -> bool {
        stored.key_version() != self.keys.current_version(KeyLabel::Encryption)
    }

    fn derive_indexes(
        &self,
        plaintext: &str,
        capability: SearchCapability,
    ) -> Result<(Option<BlindIndexToken>, Option<TrigramTokenSet>)> {
        if capability == SearchCapability::None {
            return Ok((None, None));
        }
        let normalized = Zeroizing::new(self.policy().normalize(plaintext));
        let version = self.keys.current_version(KeyLabel::Index);

        let trigrams = if capability.supports_partial() {
            Some(self.trigram.storage_tokens_normalized(&normalized, version)?)
        } else {
            None
        };
        let blind = self.blind.index_normalized(&normalized, version)?;
        Ok((Some(blind), trigrams))
    }

    // ========================================================================
    // Query side
    // ========================================================================

    /// Blind-index token for an exact query under `version`.
    pub fn exact_query_token(&self, query: &str, version: u32) -> Result<BlindIndexToken> {
        let normalized = self.normalize_exact_query(query)?;
        self.blind.index_normalized(&normalized, version)
    }

    fn normalize_exact_query(&self, query: &str) -> Result<Zeroizing<String>> {
        if query.trim().is_empty() {
            return Err(PiiError::InvalidQuery("query is empty".into()));
        }
        let normalized = Zeroizing::new(self.policy().normalize(query));
        if normalized.is_empty() {
            return Err(PiiError::InvalidQuery(format!(
                "query is empty after {} normalization",
                self.policy()
            )));
        }
        Ok(normalized)
    }

    /// Trigram tokens for a substring query under `version`.
    pub fn partial_query_tokens(&self, query: &str, version: u32) -> Result<TrigramTokenSet> {
        self.trigram.tokens_for_query_at(query, version)
    }

    /// Reject a query before any lookup or cryptographic work.
    pub fn validate_query(&self, query: &str, capability: SearchCapability) -> Result<()> {
        match capability {
            SearchCapability::Partial => self.trigram.normalize_query(query).map(|_| ()),
            SearchCapability::Exact => self.normalize_exact_query(query).map(|_| ()),
            SearchCapability::None => Err(PiiError::InvalidQuery(
                "search capability \"none\" cannot be queried".into(),
            )),
        }
    }

    /// Post-decryption check for exact search.
    pub fn matches_exact(&self, plaintext: &str, query: &str) -> bool {
        let policy = self.policy();
        policy.normalize(plaintext) == policy.normalize(query)
    }

    /// Post-decryption check for partial search.
    pub fn matches_partial(&self, plaintext: &str, query: &str) -> bool {
        self.trigram.verify(plaintext, query)
    }
}
