//! Value normalization applied before any index token is computed.
//!
//! Index build, query and post-decryption verification all go through the
//! same `NormalizationPolicy::normalize`. If the two sides diverge, recall
//! silently drops, so policies are fixed per attribute.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::PiiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// NFKC, lowercase, trim, collapse whitespace runs to a single space.
    #[default]
    Standard,
    /// NFKC, lowercase, all whitespace removed (emails, IBANs, postcodes).
    Compact,
    /// NFKC, decimal digits only (phone numbers).
    Digits,
}

impl NormalizationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationPolicy::Standard => "standard",
            NormalizationPolicy::Compact => "compact",
            NormalizationPolicy::Digits => "digits",
        }
    }

    pub fn normalize(&self, input: &str) -> String {
        let folded = input.nfkc().collect::<String>().to_lowercase();
        match self {
            NormalizationPolicy::Standard => folded.split_whitespace().collect::<Vec<_>>().join(" "),
            NormalizationPolicy::Compact => folded.chars().filter(|c| !c.is_whitespace()).collect(),
            NormalizationPolicy::Digits => folded.chars().filter(|c| c.is_ascii_digit()).collect(),
        }
    }
}

impl FromStr for NormalizationPolicy {
    type Err = PiiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(NormalizationPolicy::Standard),
            "compact" => Ok(NormalizationPolicy::Compact),
            "digits" => Ok(NormalizationPolicy::Digits),
            other => Err(PiiError::Config(format!(
                "unknown normalization policy \"{}\"",
                other
            ))),
        }
    }
}

impl std::fmt::Display for NormalizationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
