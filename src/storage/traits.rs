//! The record-store contract protected attributes are persisted through.

use crate::attribute::StoredValue;
use crate::blind_index::BlindIndexToken;
use crate::error::Result;
use crate::trigram::TrigramTokenSet;

/// Persistence for encrypted attribute values and their index tokens.
///
/// A store only ever sees ciphertext envelopes and keyed tokens. Implementations
/// must write a value's envelope, blind index and trigram set together, so
/// that readers never observe tokens that disagree with the envelope.
///
/// All methods take `&self`; implementations use interior mutability so a
/// store can be shared across threads.
pub trait RecordStore: Send + Sync {
    /// Insert or replace the value of `attribute` for `record_id`.
    /// Replacing drops every token of the previous value.
    fn put(&self, record_id: &str, attribute: &str, value: &StoredValue) -> Result<()>;

    /// Fetch one value. Returns `Ok(None)` if absent.
    fn get(&self, record_id: &str, attribute: &str) -> Result<Option<StoredValue>>;

    /// Delete one value and its tokens. Returns whether anything was removed.
    fn delete(&self, record_id: &str, attribute: &str) -> Result<bool>;

    /// Ids of every record holding a value for `attribute`, in id order.
    fn scan(&self, attribute: &str) -> Result<Vec<String>>;

    /// Ids of records whose blind index equals `token` (same version).
    fn find_by_blind_index(&self, attribute: &str, token: &BlindIndexToken)
        -> Result<Vec<String>>;

    /// Ids of records whose trigram set, at `query.version`, is a superset
    /// of `query`. An empty query has no candidates.
    fn find_trigram_candidates(&self, attribute: &str, query: &TrigramTokenSet)
        -> Result<Vec<String>>;

    /// Distinct index versions present among stored tokens for `attribute`,
    /// ascending.
    fn index_versions(&self, attribute: &str) -> Result<Vec<u32>>;
}
