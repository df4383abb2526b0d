//! Composite `(adm2, adm1)` keys identifying administrative units.
//!
//! Keys travel through the pipeline as [`UnitKey`] values. They are only
//! turned into text at the CSV boundary, where a checkpoint column label is a
//! two-element JSON array such as `["Ikeja","Lagos"]`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Name used for the missing level when a source only has one level.
pub const PLACEHOLDER: &str = "dummy";

/// Composite key of an administrative unit.
///
/// Ordering is lexicographic on `adm2`, then `adm1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    /// Second-level (district) name.
    pub adm2: String,
    /// First-level (state/region) name, or [`PLACEHOLDER`].
    pub adm1: String,
}

impl UnitKey {
    pub fn new(adm2: impl Into<String>, adm1: impl Into<String>) -> Self {
        Self {
            adm2: adm2.into(),
            adm1: adm1.into(),
        }
    }

    /// Key for a single-level source: `adm1` collapses to the placeholder.
    pub fn single_level(adm2: impl Into<String>) -> Self {
        Self::new(adm2, PLACEHOLDER)
    }

    /// Returns `true` when `adm1` is the single-level placeholder.
    pub fn is_single_level(&self) -> bool {
        self.adm1 == PLACEHOLDER
    }

    /// Encodes the key as a checkpoint column label.
    pub fn to_label(&self) -> String {
        serde_json::json!([self.adm2, self.adm1]).to_string()
    }

    /// Decodes a checkpoint column label produced by [`UnitKey::to_label`].
    ///
    /// # Errors
    ///
    /// Returns a `KeyError` if the label is not a JSON array of exactly two
    /// strings.
    pub fn from_label(raw: &str) -> Result<Self, KeyError> {
        serde_json::from_str::<(String, String)>(raw.trim())
            .map(|(adm2, adm1)| Self { adm2, adm1 })
            .map_err(|e| KeyError {
                raw: raw.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.adm2, self.adm1)
    }
}
