//! Startup configuration.
//!
//! Read once at process start, from the environment, JSON, or code:
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `LESS_PII_MASTER_SECRET` | `master_secret` (base64, >= 32 bytes decoded) | none (fatal) |
//! | `LESS_PII_NORMALIZATION` | `normalization` | `standard` |
//! | `LESS_PII_KEY_VERSION` | `initial_version` | `0` |
//! | `LESS_PII_MAX_INDEXED_CHARS` | `max_indexed_chars` | `256` |

use serde::Deserialize;

use crate::error::{PiiError, Result};
use crate::normalize::NormalizationPolicy;
use crate::types::DEFAULT_MAX_INDEXED_CHARS;

pub const ENV_MASTER_SECRET: &str = "LESS_PII_MASTER_SECRET";
pub const ENV_NORMALIZATION: &str = "LESS_PII_NORMALIZATION";
pub const ENV_KEY_VERSION: &str = "LESS_PII_KEY_VERSION";
pub const ENV_MAX_INDEXED_CHARS: &str = "LESS_PII_MAX_INDEXED_CHARS";

/// Configuration for the key manager and the attributes built on it.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Base64-encoded master secret.
    pub master_secret: Option<String>,
    /// Normalization applied to indexed values and queries.
    pub normalization: NormalizationPolicy,
    /// Version both key labels start at. Signed so a negative input is
    /// reported instead of wrapping.
    pub initial_version: i64,
    /// Longest normalized value accepted for partial (trigram) indexing.
    pub max_indexed_chars: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_secret: None,
            normalization: NormalizationPolicy::Standard,
            initial_version: 0,
            max_indexed_chars: DEFAULT_MAX_INDEXED_CHARS,
        }
    }
}

impl VaultConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            master_secret: lookup(ENV_MASTER_SECRET).filter(|s| !s.trim().is_empty()),
            ..Self::default()
        };
        if let Some(policy) = lookup(ENV_NORMALIZATION) {
            config.normalization = policy.parse()?;
        }
        if let Some(version) = lookup(ENV_KEY_VERSION) {
            config.initial_version = version.trim().parse().map_err(|_| {
                PiiError::Config(format!("{} must be an integer", ENV_KEY_VERSION))
            })?;
        }
        if let Some(max) = lookup(ENV_MAX_INDEXED_CHARS) {
            config.max_indexed_chars = max.trim().parse().map_err(|_| {
                PiiError::Config(format!("{} must be a positive integer", ENV_MAX_INDEXED_CHARS))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PiiError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_master_secret(mut self, encoded: impl Into<String>) -> Self {
        self.master_secret = Some(encoded.into());
        self
    }

    /// Initial key version as an unsigned version number.
    pub fn initial_version(&self) -> Result<u32> {
        u32::try_from(self.initial_version).map_err(|_| {
            PiiError::KeyDerivation(format!(
                "key version must be between 0 and {}, got {}",
                u32::MAX,
                self.initial_version
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.max_indexed_chars == 0 {
            return Err(PiiError::Config(
                "max_indexed_chars must be greater than zero".into(),
            ));
        }
        self.initial_version()?;
        Ok(())
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field(
                "master_secret",
                &self.master_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("normalization", &self.normalization)
            .field("initial_version", &self.initial_version)
            .field("max_indexed_chars", &self.max_indexed_chars)
            .finish()
    }
}
