//! AES-256-GCM value encryption under versioned derived keys.
//!
//! AAD = [envelope header: format + key_version][optional context AAD]

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use tracing::warn;

use crate::envelope::CiphertextEnvelope;
use crate::error::{PiiError, Result};
use crate::key_manager::{DerivedKey, KeyManager};
use crate::types::{EncryptionContext, KeyLabel, NONCE_LENGTH, TAG_LENGTH};

/// Generate a random 12-byte nonce from the OS CSPRNG.
pub fn generate_nonce() -> Result<[u8; NONCE_LENGTH]> {
    let mut nonce = [0u8; NONCE_LENGTH];
    getrandom::getrandom(&mut nonce).map_err(|e| PiiError::Rng(e.to_string()))?;
    Ok(nonce)
}

fn build_aad(key_version: u32, context: Option<&EncryptionContext>) -> Vec<u8> {
    let mut aad = CiphertextEnvelope::header(key_version).to_vec();
    if let Some(ctx) = context {
        aad.extend_from_slice(&ctx.to_aad());
    }
    aad
}

fn cipher_for(key: &DerivedKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| PiiError::EncryptionFailed(e.to_string()))
}

/// Authenticated encryption of single values.
///
/// Every envelope records the key version it was written with, so values
/// stay decryptable after the current version moves on.
#[derive(Debug, Clone)]
pub struct EncryptionService {
    keys: Arc<KeyManager>,
}

impl EncryptionService {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypt under the current [`KeyLabel::Encryption`] version.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<CiphertextEnvelope> {
        self.encrypt_with_label(KeyLabel::Encryption, plaintext, context)
    }

    /// Encrypt under the current version of `label`.
    pub fn encrypt_with_label(
        &self,
        label: KeyLabel,
        plaintext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<CiphertextEnvelope> {
        let (key_version, key) = self.keys.resolve_current(label)?;
        let cipher = cipher_for(&key)?;
        let nonce = generate_nonce()?;
        let aad = build_aad(key_version, context);

        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| PiiError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the 16-byte tag to the ciphertext
        let tag_start = sealed.len() - TAG_LENGTH;
        let tag: [u8; TAG_LENGTH] = sealed[tag_start..]
            .try_into()
            .map_err(|_| PiiError::EncryptionFailed("missing authentication tag".into()))?;
        sealed.truncate(tag_start);

        Ok(CiphertextEnvelope {
            key_version,
            nonce,
            ciphertext: sealed,
            tag,
        })
    }

    /// Decrypt an envelope written under [`KeyLabel::Encryption`].
    pub fn decrypt(
        &self,
        envelope: &CiphertextEnvelope,
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>> {
        self.decrypt_with_label(KeyLabel::Encryption, envelope, context)
    }

    /// Decrypt with the key version recorded in the envelope.
    ///
    /// Fails with [`PiiError::Authentication`] on any tag mismatch, without
    /// saying why, and never returns partial plaintext.
    pub fn decrypt_with_label(
        &self,
        label: KeyLabel,
        envelope: &CiphertextEnvelope,
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>> {
        let key = self.keys.resolve(label, envelope.key_version)?;
        let cipher = cipher_for(&key)?;
        let aad = build_aad(envelope.key_version, context);

        let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LENGTH);
        sealed.extend_from_slice(&envelope.ciphertext);
        sealed.extend_from_slice(&envelope.tag);

        cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| PiiError::Authentication)
    }

    /// Decrypt a stored envelope blob.
    pub fn decrypt_bytes(
        &self,
        stored: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>> {
        let envelope = CiphertextEnvelope::from_bytes(stored)?;
        self.decrypt(&envelope, context)
    }

    /// Re-encrypt an envelope under the current encryption version.
    ///
    /// Returns `None` when the envelope is already current.
    pub fn reencrypt(
        &self,
        envelope: &CiphertextEnvelope,
        context: Option<&EncryptionContext>,
    ) -> Result<Option<CiphertextEnvelope>> {
        if envelope.key_version == self.keys.current_version(KeyLabel::Encryption) {
            return Ok(None);
        }
        let plaintext = zeroize::Zeroizing::new(self.decrypt(envelope, context).map_err(|e| {
            if let PiiError::KeyUnavailable { version, .. } = &e {
                warn!(version, "cannot re-encrypt value: key version unavailable");
            }
            e
        })?);
        self.encrypt(&plaintext, context).map(Some)
    }
}
