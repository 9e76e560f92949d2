//! Integration tests for searchable encrypted columns.

mod concurrency;
mod properties;
mod rotation;
mod scenario;

use std::sync::Arc;

use less_pii::{
    AttributeOptions, EncryptedAttribute, KeyManager, MasterSecret, MemoryStore,
    NormalizationPolicy, SearchCapability, SearchableColumn,
};

// ============================================================================
// Helpers
// ============================================================================

pub const SECRET: [u8; 32] = *b"integration-test-master-secret!!";

pub fn key_manager() -> Arc<KeyManager> {
    let secret = MasterSecret::new(&SECRET).expect("valid master secret");
    Arc::new(KeyManager::new(secret, 0))
}

/// Phone column with partial search over an in-memory store.
pub fn phone_column(keys: Arc<KeyManager>) -> SearchableColumn<MemoryStore> {
    let attr = EncryptedAttribute::new(
        keys,
        "phone",
        AttributeOptions::default().with_policy(NormalizationPolicy::Digits),
    );
    SearchableColumn::new(attr, SearchCapability::Partial, MemoryStore::new())
}

pub fn name_column(keys: Arc<KeyManager>) -> SearchableColumn<MemoryStore> {
    let attr = EncryptedAttribute::new(keys, "name", AttributeOptions::default());
    SearchableColumn::new(attr, SearchCapability::Partial, MemoryStore::new())
}
