//! Searchable encrypted column over a [`RecordStore`].
//!
//! Search is always two-phase:
//! 1. Token lookup in the store yields candidate record ids. The store never
//!    sees a plaintext or a query.
//! 2. Every candidate is decrypted and checked against the query. Only
//!    verified records are returned; candidates that fail decryption are
//!    reported as unavailable.
//!
//! Rotation jobs (`rebuild_indexes`, `reencrypt`) report per-record outcomes
//! so a caller can retry exactly the failed subset.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::attribute::{EncryptedAttribute, SearchCapability, StoredValue};
use crate::error::{PiiError, Result};
use crate::storage::RecordStore;

// ============================================================================
// Results
// ============================================================================

/// One verified search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub record_id: String,
    pub plaintext: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Candidates whose decrypted value satisfied the query.
    pub matches: Vec<Match>,
    /// Candidates that could not be decrypted. Never part of `matches`.
    pub unavailable: Vec<String>,
}

impl SearchResults {
    pub fn record_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.record_id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub record_id: String,
    pub error: PiiError,
}

/// Outcome of a rotation batch job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records rewritten under the current version.
    pub updated: usize,
    /// Records already current, or gone by the time they were visited.
    pub skipped: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Ids to pass back to `*_for` on retry.
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.record_id.clone()).collect()
    }
}

enum Outcome {
    Updated,
    Skipped,
}

// ============================================================================
// SearchableColumn
// ============================================================================

/// An encrypted attribute bound to a store and a search capability.
pub struct SearchableColumn<S: RecordStore> {
    attribute: EncryptedAttribute,
    capability: SearchCapability,
    store: S,
    /// Serializes read-modify-write so batch jobs never overwrite a newer write.
    write_lock: Mutex<()>,
}

impl<S: RecordStore> SearchableColumn<S> {
    pub fn new(attribute: EncryptedAttribute, capability: SearchCapability, store: S) -> Self {
        Self {
            attribute,
            capability,
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn attribute(&self) -> &EncryptedAttribute {
        &self.attribute
    }

    pub fn capability(&self) -> SearchCapability {
        self.capability
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn name(&self) -> &str {
        self.attribute.name()
    }

    // ------------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------------

    /// Encrypt and index `plaintext`, replacing any previous value and all
    /// of its tokens.
    pub fn write(&self, record_id: &str, plaintext: &str) -> Result<()> {
        let value = self.attribute.store(plaintext, self.capability)?;
        let _guard = self.write_lock.lock();
        self.store.put(record_id, self.name(), &value)
    }

    /// Write under a fresh random record id and return it.
    pub fn insert(&self, plaintext: &str) -> Result<String> {
        let record_id = uuid::Uuid::new_v4().to_string();
        self.write(&record_id, plaintext)?;
        Ok(record_id)
    }

    /// Decrypt one value. `Ok(None)` if absent; a tampered value fails with
    /// [`PiiError::Authentication`].
    pub fn read(&self, record_id: &str) -> Result<Option<String>> {
        match self.store.get(record_id, self.name())? {
            Some(value) => self.attribute.load(&value).map(Some),
            None => Ok(None),
        }
    }

    pub fn delete(&self, record_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        self.store.delete(record_id, self.name())
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// Records whose value equals `query` after normalization.
    pub fn find_exact(&self, query: &str) -> Result<SearchResults> {
        if !self.capability.supports_exact() {
            return Err(PiiError::InvalidQuery(format!(
                "attribute \"{}\" does not support exact search",
                self.name()
            )));
        }
        self.attribute.validate_query(query, SearchCapability::Exact)?;

        let mut candidates = BTreeSet::new();
        for version in self.store.index_versions(self.name())? {
            let token = match self.attribute.exact_query_token(query, version) {
                Ok(token) => token,
                Err(e @ PiiError::KeyUnavailable { .. }) => {
                    warn!(attribute = self.name(), version, error = %e, "skipping index version");
                    continue;
                }
                Err(e) => return Err(e),
            };
            candidates.extend(self.store.find_by_blind_index(self.name(), &token)?);
        }

        Ok(self.verify(candidates, |plaintext| {
            self.attribute.matches_exact(plaintext, query)
        }))
    }

    /// Phase 1 only: ids whose trigram sets cover the query. May contain
    /// false positives and undecryptable records.
    pub fn partial_candidates(&self, query: &str) -> Result<Vec<String>> {
        if !self.capability.supports_partial() {
            return Err(PiiError::InvalidQuery(format!(
                "attribute \"{}\" does not support partial search",
                self.name()
            )));
        }
        self.attribute
            .validate_query(query, SearchCapability::Partial)?;

        let mut candidates = BTreeSet::new();
        for version in self.store.index_versions(self.name())? {
            let tokens = match self.attribute.partial_query_tokens(query, version) {
                Ok(tokens) => tokens,
                Err(e @ PiiError::KeyUnavailable { .. }) => {
                    warn!(attribute = self.name(), version, error = %e, "skipping index version");
                    continue;
                }
                Err(e) => return Err(e),
            };
            candidates.extend(self.store.find_trigram_candidates(self.name(), &tokens)?);
        }
        Ok(candidates.into_iter().collect())
    }

    /// Records whose value contains `query` after normalization.
    pub fn find_partial(&self, query: &str) -> Result<SearchResults> {
        let candidates = self.partial_candidates(query)?;
        debug!(
            attribute = self.name(),
            candidates = candidates.len(),
            "verifying partial-search candidates"
        );
        Ok(self.verify(candidates, |plaintext| {
            self.attribute.matches_partial(plaintext, query)
        }))
    }

    /// Phase 2: decrypt each candidate and keep those `accept` confirms.
    fn verify<I, F>(&self, candidates: I, accept: F) -> SearchResults
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> bool,
    {
        let mut results = SearchResults::default();
        for record_id in candidates {
            let value = self
                .store
                .get(&record_id, self.name())
                .and_then(|value| value.map(|v| self.attribute.load(&v)).transpose());
            match value {
                Ok(Some(plaintext)) => {
                    if accept(&plaintext) {
                        results.matches.push(Match {
                            record_id,
                            plaintext,
                        });
                    }
                }
                // deleted since the lookup
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        attribute = self.name(),
                        record_id = %record_id,
                        error = %e,
                        "search candidate could not be decrypted"
                    );
                    results.unavailable.push(record_id);
                }
            }
        }
        results
    }

    // ------------------------------------------------------------------------
    // Rotation jobs
    // ------------------------------------------------------------------------

    /// Re-derive tokens of every stale record under the current index version.
    pub fn rebuild_indexes(&self) -> Result<BatchReport> {
        let ids = self.store.scan(self.name())?;
        Ok(self.rebuild_indexes_for(&ids))
    }

    /// Re-derive tokens for `record_ids` only, e.g. the failures of a previous run.
    pub fn rebuild_indexes_for(&self, record_ids: &[String]) -> BatchReport {
        let report = self.run_batch(record_ids, |value| {
            if !self.attribute.needs_reindex(value) {
                return Ok(None);
            }
            self.attribute.refresh_indexes(value).map(Some)
        });
        info!(
            attribute = self.name(),
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed.len(),
            "index rebuild finished"
        );
        report
    }

    /// Move every stale envelope to the current encryption version.
    pub fn reencrypt(&self) -> Result<BatchReport> {
        let ids = self.store.scan(self.name())?;
        Ok(self.reencrypt_for(&ids))
    }

    pub fn reencrypt_for(&self, record_ids: &[String]) -> BatchReport {
        let report = self.run_batch(record_ids, |value| self.attribute.reencrypt(value));
        info!(
            attribute = self.name(),
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed.len(),
            "re-encryption finished"
        );
        report
    }

    fn run_batch<F>(&self, record_ids: &[String], transform: F) -> BatchReport
    where
        F: Fn(&StoredValue) -> Result<Option<StoredValue>>,
    {
        let mut report = BatchReport::default();
        for record_id in record_ids {
            match self.rewrite(record_id, &transform) {
                Ok(Outcome::Updated) => report.updated += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(error) => {
                    warn!(
                        attribute = self.name(),
                        record_id = %record_id,
                        error = %error,
                        "batch update failed"
                    );
                    report.failed.push(BatchFailure {
                        record_id: record_id.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    fn rewrite<F>(&self, record_id: &str, transform: &F) -> Result<Outcome>
    where
        F: Fn(&StoredValue) -> Result<Option<StoredValue>>,
    {
        let _guard = self.write_lock.lock();
        let Some(value) = self.store.get(record_id, self.name())? else {
            return Ok(Outcome::Skipped);
        };
        match transform(&value)? {
            Some(updated) => {
                self.store.put(record_id, self.name(), &updated)?;
                Ok(Outcome::Updated)
            }
            None => Ok(Outcome::Skipped),
        }
    }
}
