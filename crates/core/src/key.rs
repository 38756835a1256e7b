//! Canonical artifact keys.
//!
//! Callers address artifacts by free-form names ("Lightning Bolt"). The cache
//! stores at most one row per *canonical* key: the requested name with
//! surrounding whitespace trimmed and case folded.

use crate::error::{Error, Result};
use crate::{MAX_BATCH_KEYS, MAX_KEY_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized form of a requested key; the uniqueness boundary for cache rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Canonicalize a raw requested key.
    ///
    /// Fails for keys that are blank after trimming or longer than
    /// [`MAX_KEY_LEN`] characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidKey("key must not be blank".to_string()));
        }
        if trimmed.chars().count() > MAX_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "key exceeds {MAX_KEY_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// Get the canonical key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a submitted batch of raw keys.
///
/// A batch must hold between 1 and `max_keys` entries (never more than
/// [`MAX_BATCH_KEYS`]) and every entry must canonicalize.
pub fn validate_batch(keys: &[String], max_keys: usize) -> Result<()> {
    let max_keys = max_keys.clamp(1, MAX_BATCH_KEYS);
    if keys.is_empty() {
        return Err(Error::InvalidBatch("at least one key is required".to_string()));
    }
    if keys.len() > max_keys {
        return Err(Error::InvalidBatch(format!(
            "batch of {} keys exceeds the limit of {max_keys}",
            keys.len()
        )));
    }
    for (index, key) in keys.iter().enumerate() {
        CanonicalKey::parse(key)
            .map_err(|e| Error::InvalidBatch(format!("keys[{index}]: {e}")))?;
    }
    Ok(())
}
