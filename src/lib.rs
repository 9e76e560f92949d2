//! Searchable encryption for personal data stored in a record store.
//!
//! Values are sealed as versioned AES-256-GCM envelopes. Exact search uses
//! keyed blind indexes; substring search uses keyed trigram sets followed by
//! mandatory decrypt-and-verify.

pub mod attribute;
pub mod blind_index;
pub mod column;
pub mod config;
pub mod encryption;
pub mod envelope;
pub mod error;
pub mod hkdf;
pub mod key_manager;
pub mod normalize;
pub mod storage;
pub mod trigram;
pub mod types;

pub use attribute::{AttributeOptions, EncryptedAttribute, SearchCapability, StoredValue};
pub use blind_index::{BlindIndexService, BlindIndexToken};
pub use column::{BatchFailure, BatchReport, Match, SearchResults, SearchableColumn};
pub use config::VaultConfig;
pub use encryption::EncryptionService;
pub use envelope::{peek_key_version, CiphertextEnvelope};
pub use error::{ErrorKind, PiiError, Result};
pub use key_manager::{DerivedKey, KeyManager, MasterSecret};
pub use normalize::NormalizationPolicy;
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use storage::{MemoryStore, RecordStore};
pub use trigram::{TrigramIndexService, TrigramToken, TrigramTokenSet};
pub use types::{EncryptionContext, KeyLabel};
