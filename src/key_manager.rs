//! Versioned key derivation from a single master secret.
//!
//! Keys are derived lazily and cached for the life of the manager. Readers
//! share a read lock; a miss takes the write lock, so each (label, version)
//! is derived and published exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::VaultConfig;
use crate::error::{PiiError, Result};
use crate::hkdf::derive_versioned_key;
use crate::types::{KeyLabel, KEY_LENGTH, MAX_VERSION_ADVANCE, MIN_MASTER_SECRET_LENGTH};

// ============================================================================
// MasterSecret
// ============================================================================

/// Root secret supplied at process start. Held in memory only.
pub struct MasterSecret {
    bytes: Zeroizing<Vec<u8>>,
}

impl MasterSecret {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_MASTER_SECRET_LENGTH {
            return Err(PiiError::KeyDerivation(format!(
                "master secret must be at least {} bytes, got {}",
                MIN_MASTER_SECRET_LENGTH,
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: Zeroizing::new(bytes.to_vec()),
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| PiiError::KeyDerivation("master secret is not valid base64".into()))?,
        );
        Self::new(&decoded)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterSecret([REDACTED])")
    }
}

// ============================================================================
// DerivedKey
// ============================================================================

/// A derived 256-bit key. Never serialized, never logged.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LENGTH],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

// ============================================================================
// KeyManager
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct VersionWindow {
    /// Version new writes use.
    current: u32,
    /// Lowest version still resolvable.
    floor: u32,
}

/// Derives, caches and versions keys for every [`KeyLabel`].
///
/// Construct once at startup and share behind an `Arc`.
pub struct KeyManager {
    secret: MasterSecret,
    versions: RwLock<HashMap<KeyLabel, VersionWindow>>,
    cache: RwLock<HashMap<(KeyLabel, u32), Arc<DerivedKey>>>,
}

impl KeyManager {
    /// Create a manager whose labels all start at `initial_version`.
    pub fn new(secret: MasterSecret, initial_version: u32) -> Self {
        let versions = KeyLabel::ALL
            .iter()
            .map(|label| {
                (
                    *label,
                    VersionWindow {
                        current: initial_version,
                        floor: 0,
                    },
                )
            })
            .collect();
        Self {
            secret,
            versions: RwLock::new(versions),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build from startup configuration. Fails if the secret is missing or weak.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let encoded = config
            .master_secret
            .as_deref()
            .ok_or_else(|| PiiError::KeyDerivation("master secret is not configured".into()))?;
        let secret = MasterSecret::from_base64(encoded)?;
        Ok(Self::new(secret, config.initial_version()?))
    }

    /// Version new writes under `label` must use.
    pub fn current_version(&self, label: KeyLabel) -> u32 {
        self.window(label).current
    }

    /// Lowest version of `label` that still resolves.
    pub fn floor_version(&self, label: KeyLabel) -> u32 {
        self.window(label).floor
    }

    /// Advance the current version of `label` by one. Older versions stay resolvable.
    pub fn rotate(&self, label: KeyLabel) -> Result<u32> {
        let mut versions = self.versions.write();
        let window = versions.entry(label).or_insert(VersionWindow {
            current: 0,
            floor: 0,
        });
        let next = window.current.checked_add(1).ok_or_else(|| {
            PiiError::KeyDerivation(format!("{} key version space exhausted", label))
        })?;
        window.current = next;
        info!(label = %label, version = next, "rotated key version");
        Ok(next)
    }

    /// Stop resolving versions of `label` below `version` and drop their cached keys.
    ///
    /// Call only once every value has been re-encrypted or re-indexed past them.
    pub fn retire_versions_below(&self, label: KeyLabel, version: u32) -> Result<()> {
        {
            let mut versions = self.versions.write();
            let window = versions.entry(label).or_insert(VersionWindow {
                current: 0,
                floor: 0,
            });
            if version > window.current {
                return Err(PiiError::Config(format!(
                    "cannot retire {} versions above current version {}",
                    label, window.current
                )));
            }
            window.floor = window.floor.max(version);
        }
        self.cache
            .write()
            .retain(|(l, v), _| *l != label || *v >= version);
        info!(label = %label, floor = version, "retired key versions");
        Ok(())
    }

    /// Resolve the key for `(label, version)`, deriving and caching it on first use.
    pub fn resolve(&self, label: KeyLabel, version: u32) -> Result<Arc<DerivedKey>> {
        let window = self.window(label);
        if version < window.floor || version > window.current.saturating_add(MAX_VERSION_ADVANCE) {
            warn!(label = %label, version, "key version outside resolvable window");
            return Err(PiiError::KeyUnavailable { label, version });
        }

        if let Some(key) = self.cache.read().get(&(label, version)) {
            return Ok(Arc::clone(key));
        }

        let mut cache = self.cache.write();
        // Another writer may have published it while we waited.
        if let Some(key) = cache.get(&(label, version)) {
            return Ok(Arc::clone(key));
        }
        let bytes = derive_versioned_key(self.secret.as_bytes(), label, version)?;
        let key = Arc::new(DerivedKey { bytes });
        cache.insert((label, version), Arc::clone(&key));
        debug!(label = %label, version, "derived key");
        Ok(key)
    }

    /// Resolve the key new writes under `label` must use, with its version.
    pub fn resolve_current(&self, label: KeyLabel) -> Result<(u32, Arc<DerivedKey>)> {
        let version = self.current_version(label);
        Ok((version, self.resolve(label, version)?))
    }

    /// Versions of `label` currently held in the cache, ascending.
    pub fn cached_versions(&self, label: KeyLabel) -> Vec<u32> {
        let mut versions: Vec<u32> = self
            .cache
            .read()
            .keys()
            .filter(|(l, _)| *l == label)
            .map(|(_, v)| *v)
            .collect();
        versions.sort_unstable();
        versions
    }

    fn window(&self, label: KeyLabel) -> VersionWindow {
        self.versions
            .read()
            .get(&label)
            .copied()
            .unwrap_or(VersionWindow {
                current: 0,
                floor: 0,
            })
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("encryption_version", &self.current_version(KeyLabel::Encryption))
            .field("index_version", &self.current_version(KeyLabel::Index))
            .finish_non_exhaustive()
    }
}
