//! Keyed trigram tokens for substring search.
//!
//! A stored value is indexed as the set of keyed hashes of its overlapping
//! 3-character shingles. A query matches a value's token set when every query
//! token is present (subset). Subset matching has no false negatives for
//! queries of 3 or more characters, but it does have false positives: every
//! shingle of "bcabc" occurs in "abcabd", which does not contain it. Every candidate
//! must be decrypted and checked with [`TrigramIndexService::verify`] before
//! it is returned.
//!
//! Values and queries shorter than 3 characters are represented by a single
//! shingle holding the whole string, so a 2-character query only finds
//! values that normalize to exactly those 2 characters. A query typed with 3
//! or more characters that normalization shrinks below 3 (`"+33"` under the
//! digits policy, `"ab "` under the standard one) is rejected.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::blind_index::{keyed_hash, DOMAIN_TRIGRAM};
use crate::error::{PiiError, Result};
use crate::key_manager::KeyManager;
use crate::normalize::NormalizationPolicy;
use crate::types::{KeyLabel, DEFAULT_MAX_INDEXED_CHARS, SHINGLE_LENGTH, TOKEN_LENGTH};

/// One keyed shingle hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrigramToken(pub [u8; TOKEN_LENGTH]);

impl TrigramToken {
    pub fn as_bytes(&self) -> &[u8; TOKEN_LENGTH] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let token: [u8; TOKEN_LENGTH] = bytes.try_into().map_err(|_| {
            PiiError::Storage(format!(
                "trigram token must be {} bytes, got {}",
                TOKEN_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(token))
    }
}

/// Deduplicated trigram tokens of one value, with the index version used.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrigramTokenSet {
    pub version: u32,
    pub tokens: BTreeSet<TrigramToken>,
}

impl TrigramTokenSet {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, token: &TrigramToken) -> bool {
        self.tokens.contains(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrigramToken> {
        self.tokens.iter()
    }
}

/// Overlapping shingles of an already-normalized string, counted in chars.
pub fn shingles(normalized: &str) -> BTreeSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return BTreeSet::new();
    }
    if chars.len() < SHINGLE_LENGTH {
        return BTreeSet::from([normalized.to_string()]);
    }
    chars
        .windows(SHINGLE_LENGTH)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Computes and compares trigram token sets under the index key.
#[derive(Debug, Clone)]
pub struct TrigramIndexService {
    keys: Arc<KeyManager>,
    policy: NormalizationPolicy,
    scope: String,
    max_indexed_chars: usize,
}

impl TrigramIndexService {
    pub fn new(keys: Arc<KeyManager>, policy: NormalizationPolicy, max_indexed_chars: usize) -> Self {
        Self {
            keys,
            policy,
            scope: String::new(),
            max_indexed_chars,
        }
    }

    pub fn with_defaults(keys: Arc<KeyManager>) -> Self {
        Self::new(keys, NormalizationPolicy::default(), DEFAULT_MAX_INDEXED_CHARS)
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    pub fn max_indexed_chars(&self) -> usize {
        self.max_indexed_chars
    }

    /// Token set for a stored value under the current index version.
    ///
    /// Fails with [`PiiError::InputTooLong`] when the normalized value is
    /// longer than the indexing bound.
    pub fn tokens_for_storage(&self, plaintext: &str) -> Result<TrigramTokenSet> {
        let normalized = self.policy.normalize(plaintext);
        let version = self.keys.current_version(KeyLabel::Index);
        self.storage_tokens_normalized(&normalized, version)
    }

    pub(crate) fn storage_tokens_normalized(
        &self,
        normalized: &str,
        version: u32,
    ) -> Result<TrigramTokenSet> {
        let len = normalized.chars().count();
        if len > self.max_indexed_chars {
            return Err(PiiError::InputTooLong {
                len,
                max: self.max_indexed_chars,
            });
        }
        self.hash_shingles(normalized, version)
    }

    /// Token set for a search term under the current index version.
    pub fn tokens_for_query(&self, query: &str) -> Result<TrigramTokenSet> {
        let version = self.keys.current_version(KeyLabel::Index);
        self.tokens_for_query_at(query, version)
    }

    /// Token set for a search term under a specific index version.
    pub fn tokens_for_query_at(&self, query: &str, version: u32) -> Result<TrigramTokenSet> {
        let normalized = self.normalize_query(query)?;
        self.hash_shingles(&normalized, version)
    }

    /// Validate and normalize a search term before any hashing.
    pub fn normalize_query(&self, query: &str) -> Result<String> {
        if query.trim().is_empty() {
            return Err(PiiError::InvalidQuery("query is empty".into()));
        }
        let normalized = self.policy.normalize(query);
        if normalized.is_empty() {
            return Err(PiiError::InvalidQuery(format!(
                "query is empty after {} normalization",
                self.policy
            )));
        }
        let len = normalized.chars().count();
        if len > self.max_indexed_chars {
            return Err(PiiError::InvalidQuery(format!(
                "query has {} characters, longer than any indexed value ({})",
                len, self.max_indexed_chars
            )));
        }
        if len < SHINGLE_LENGTH && query.chars().count() >= SHINGLE_LENGTH {
            return Err(PiiError::InvalidQuery(format!(
                "query keeps only {} characters after {} normalization, need at least {}",
                len, self.policy, SHINGLE_LENGTH
            )));
        }
        Ok(normalized)
    }

    fn hash_shingles(&self, normalized: &str, version: u32) -> Result<TrigramTokenSet> {
        let key = self.keys.resolve(KeyLabel::Index, version)?;
        let tokens = shingles(normalized)
            .iter()
            .map(|s| keyed_hash(&key, DOMAIN_TRIGRAM, &self.scope, s.as_bytes()).map(TrigramToken))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(TrigramTokenSet { version, tokens })
    }

    /// Phase 1: true iff `query` is a non-empty subset of `stored` under the
    /// same index version. A true result is only a candidate.
    ///
    /// Unlike a plain subset test, an empty query set matches nothing.
    /// [`Self::tokens_for_query`] never produces one.
    pub fn candidate_match(query: &TrigramTokenSet, stored: &TrigramTokenSet) -> bool {
        query.version == stored.version
            && !query.is_empty()
            && query.tokens.is_subset(&stored.tokens)
    }

    /// Phase 2: literal check of the query against a decrypted value, both
    /// normalized the same way the tokens were.
    pub fn verify(&self, plaintext: &str, query: &str) -> bool {
        let needle = self.policy.normalize(query);
        !needle.is_empty() && self.policy.normalize(plaintext).contains(&needle)
    }
}
