//! Per-(label, version) key derivation over HKDF-SHA256.
//!
//! key(label, version) = HKDF-SHA256(master_secret, salt="less-pii:key-salt:v1",
//!                                   info="less-pii:key:v1:{label}:{version}")
//!
//! The salt and info layout are part of the stored data format: changing
//! either makes every existing envelope and index token unreadable.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::PiiError;
use crate::types::{KeyLabel, KEY_LENGTH};

const KEY_SALT: &[u8] = b"less-pii:key-salt:v1";
const KEY_INFO_PREFIX: &str = "less-pii:key:v1:";

/// HKDF info string naming one key.
pub fn key_info(label: KeyLabel, version: u32) -> String {
    format!("{}{}:{}", KEY_INFO_PREFIX, label.as_str(), version)
}

/// Derive the 256-bit key for `(label, version)` from the master secret.
pub fn derive_versioned_key(
    master_secret: &[u8],
    label: KeyLabel,
    version: u32,
) -> Result<[u8; KEY_LENGTH], PiiError> {
    let hk = Hkdf::<Sha256>::new(Some(KEY_SALT), master_secret);
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(key_info(label, version).as_bytes(), &mut okm)
        .map_err(|e| {
            PiiError::KeyDerivation(format!("HKDF expand failed for {} v{}: {}", label, version, e))
        })?;
    Ok(okm)
}
