//! Core identifiers and records shared by the agent and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File extension for sealed output archives.
pub const ARCHIVE_EXT: &str = "tar.gz";

/// File extension for metadata sidecars.
pub const METADATA_EXT: &str = "meta.json";

/// Upper bound on object-key length accepted anywhere a key names a file.
const MAX_KEY_LEN: usize = 128;

/// A deterministic task fingerprint, rendered as lowercase hex.
///
/// Opaque to everything except the fingerprint engine; every other
/// component only compares, displays, or embeds it in a path after
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejection reasons for object keys.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("object key is empty")]
    Empty,

    #[error("object key exceeds {MAX_KEY_LEN} characters")]
    TooLong,

    #[error("object key contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("object key contains invalid sequence")]
    InvalidSequence,
}

/// Validate a key before it is used to build any filesystem path or URL.
///
/// Keys are hex fingerprints, optionally suffixed with `.meta.json` for
/// metadata sidecar objects. Path separators, `..`, and leading dots are
/// rejected outright.
pub fn validate_object_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong);
    }
    if key.starts_with('.') || key.contains("..") {
        return Err(KeyError::InvalidSequence);
    }
    for c in key.chars() {
        if !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-') {
            return Err(KeyError::InvalidCharacter(c));
        }
    }
    Ok(())
}

/// Remote object name for a key's metadata sidecar.
pub fn metadata_object_name(key: &CacheKey) -> String {
    format!("{}.{}", key, METADATA_EXT)
}

/// Sidecar record stored next to each archive.
///
/// `duration_millis` feeds the "saved Ns" suffix on later cache hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// The command that produced the archived outputs.
    pub command: String,
    /// Wall-clock execution duration, in milliseconds.
    pub duration_millis: u64,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}
