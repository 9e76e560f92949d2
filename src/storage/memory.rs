//! In-memory record store with inverted token indexes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::attribute::StoredValue;
use crate::blind_index::BlindIndexToken;
use crate::error::Result;
use crate::trigram::{TrigramToken, TrigramTokenSet};

use super::traits::RecordStore;

/// Postings keyed by (attribute, token).
type BlindPostings = HashMap<(String, BlindIndexToken), BTreeSet<String>>;
/// Postings keyed by (attribute, index version, token).
type TrigramPostings = HashMap<(String, u32, TrigramToken), BTreeSet<String>>;

#[derive(Default)]
struct Inner {
    /// attribute → (record id → value)
    values: HashMap<String, BTreeMap<String, StoredValue>>,
    blind: BlindPostings,
    trigrams: TrigramPostings,
}

impl Inner {
    fn unindex(&mut self, record_id: &str, attribute: &str, value: &StoredValue) {
        if let Some(token) = value.blind_index {
            let key = (attribute.to_string(), token);
            if let Some(ids) = self.blind.get_mut(&key) {
                ids.remove(record_id);
                if ids.is_empty() {
                    self.blind.remove(&key);
                }
            }
        }
        if let Some(set) = &value.trigrams {
            for token in set.iter() {
                let key = (attribute.to_string(), set.version, *token);
                if let Some(ids) = self.trigrams.get_mut(&key) {
                    ids.remove(record_id);
                    if ids.is_empty() {
                        self.trigrams.remove(&key);
                    }
                }
            }
        }
    }

    fn index(&mut self, record_id: &str, attribute: &str, value: &StoredValue) {
        if let Some(token) = value.blind_index {
            self.blind
                .entry((attribute.to_string(), token))
                .or_default()
                .insert(record_id.to_string());
        }
        if let Some(set) = &value.trigrams {
            for token in set.iter() {
                self.trigrams
                    .entry((attribute.to_string(), set.version, *token))
                    .or_default()
                    .insert(record_id.to_string());
            }
        }
    }
}

/// Record store held entirely in memory.
///
/// One `RwLock` guards values and postings together, so a `put` is atomic
/// with respect to every reader.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values stored for `attribute`.
    pub fn len(&self, attribute: &str) -> usize {
        self.inner
            .read()
            .values
            .get(attribute)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, attribute: &str) -> bool {
        self.len(attribute) == 0
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, record_id: &str, attribute: &str, value: &StoredValue) -> Result<()> {
        let mut inner = self.inner.write();
        let previous = inner
            .values
            .entry(attribute.to_string())
            .or_default()
            .insert(record_id.to_string(), value.clone());
        if let Some(previous) = previous {
            inner.unindex(record_id, attribute, &previous);
        }
        inner.index(record_id, attribute, value);
        Ok(())
    }

    fn get(&self, record_id: &str, attribute: &str) -> Result<Option<StoredValue>> {
        Ok(self
            .inner
            .read()
            .values
            .get(attribute)
            .and_then(|records| records.get(record_id))
            .cloned())
    }

    fn delete(&self, record_id: &str, attribute: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let removed = inner
            .values
            .get_mut(attribute)
            .and_then(|records| records.remove(record_id));
        match removed {
            Some(previous) => {
                inner.unindex(record_id, attribute, &previous);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan(&self, attribute: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .values
            .get(attribute)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn find_by_blind_index(
        &self,
        attribute: &str,
        token: &BlindIndexToken,
    ) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .blind
            .get(&(attribute.to_string(), *token))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn find_trigram_candidates(
        &self,
        attribute: &str,
        query: &TrigramTokenSet,
    ) -> Result<Vec<String>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        let mut postings = Vec::with_capacity(query.len());
        for token in query.iter() {
            match inner
                .trigrams
                .get(&(attribute.to_string(), query.version, *token))
            {
                Some(ids) => postings.push(ids),
                // a token nobody has rules everything out
                None => return Ok(Vec::new()),
            }
        }
        postings.sort_by_key(|ids| ids.len());

        let Some((smallest, rest)) = postings.split_first() else {
            return Ok(Vec::new());
        };
        Ok(smallest
            .iter()
            .filter(|id| rest.iter().all(|ids| ids.contains(*id)))
            .cloned()
            .collect())
    }

    fn index_versions(&self, attribute: &str) -> Result<Vec<u32>> {
        let versions: BTreeSet<u32> = self
            .inner
            .read()
            .values
            .get(attribute)
            .map(|records| records.values().filter_map(StoredValue::index_version).collect())
            .unwrap_or_default();
        Ok(versions.into_iter().collect())
    }
}
