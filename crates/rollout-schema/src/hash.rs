use serde::{Deserialize, Deserializer, Serialize};
use sha1::{Digest, Sha1};

/// A validated SHA-1 digest (40 hex characters, lowercase).
///
/// This newtype ensures that all digests in the system are validated at
/// construction time, preventing invalid hex strings from propagating
/// through the codebase. The feed identifies every artifact by this digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha1Hash(String);

/// Errors that can occur when parsing a [`Sha1Hash`].
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The string is not exactly 40 ASCII hex characters.
    #[error("invalid SHA1 digest: expected 40 hex characters, got '{0}'")]
    Malformed(String),
}

impl Sha1Hash {
    /// Parse a `Sha1Hash` from a hex string, normalizing to lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Malformed`] if `s` is not exactly 40 ASCII hex
    /// characters.
    pub fn parse(s: &str) -> Result<Self, HashError> {
        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_lowercase()))
        } else {
            Err(HashError::Malformed(s.to_string()))
        }
    }

    /// Compute the SHA-1 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha1::digest(data)))
    }

    /// Return the digest as a lowercase hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha1Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha1Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
