//! Staged-rollout eligibility.
//!
//! Eligibility is a pure function of (client identity, entry digest,
//! percentage): the client's bucket is fixed by hashing, so raising the
//! percentage only ever adds clients, never removes them.

use rand::Rng;
use sha1::{Digest, Sha1};

use crate::entry::ReleaseEntry;

/// An opaque stable client identifier used only as staging-filter input.
///
/// The core treats it as an opaque byte sequence; callers typically persist
/// a randomly generated id next to the installed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(Vec<u8>);

impl ClientIdentity {
    /// Generate a fresh random identity (16 random bytes).
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(bytes.to_vec())
    }

    /// Wrap existing identity bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw identity bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Decide whether `id` is staged into `entry`.
///
/// Entries without a staging percentage are always eligible. Otherwise the
/// client's bucket in `[0, 100)` is compared against the threshold, so a
/// client eligible at percentage `p` stays eligible at every `p' >= p`.
pub fn is_eligible(entry: &ReleaseEntry, id: &ClientIdentity) -> bool {
    match entry.staging_percentage {
        None => true,
        Some(pct) => bucket(entry, id) < pct,
    }
}

/// The client's deterministic bucket for `entry`, in `[0, 100)`.
///
/// SHA-1 over the identity bytes followed by the entry digest hex; the
/// first 8 digest bytes, big-endian, reduced mod 100.
pub fn bucket(entry: &ReleaseEntry, id: &ClientIdentity) -> u8 {
    let mut hasher = Sha1::new();
    hasher.update(id.as_bytes());
    hasher.update(entry.sha1.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(first) % 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Sha1Hash;

    fn entry(pct: Option<u8>) -> ReleaseEntry {
        let mut e = ReleaseEntry::new(
            Sha1Hash::compute(b"artifact"),
            "notes-1.0.0-full-stable.pkg",
            10,
        )
        .unwrap();
        e.staging_percentage = pct;
        e
    }

    #[test]
    fn absent_percentage_is_always_eligible() {
        let id = ClientIdentity::generate();
        assert!(is_eligible(&entry(None), &id));
    }

    #[test]
    fn zero_percent_is_never_eligible() {
        for _ in 0..64 {
            let id = ClientIdentity::generate();
            assert!(!is_eligible(&entry(Some(0)), &id));
        }
    }

    #[test]
    fn full_percent_is_always_eligible() {
        for _ in 0..64 {
            let id = ClientIdentity::generate();
            assert!(is_eligible(&entry(Some(100)), &id));
        }
    }

    #[test]
    fn deterministic_per_identity() {
        let id = ClientIdentity::from_bytes(*b"fixed-client-id!");
        let first = is_eligible(&entry(Some(50)), &id);
        for _ in 0..10 {
            assert_eq!(is_eligible(&entry(Some(50)), &id), first);
        }
    }

    #[test]
    fn monotone_in_percentage() {
        for _ in 0..128 {
            let id = ClientIdentity::generate();
            let mut was_eligible = false;
            for pct in 0..=100u8 {
                let now = is_eligible(&entry(Some(pct)), &id);
                assert!(now || !was_eligible, "eligibility must not be revoked");
                was_eligible = now;
            }
            assert!(was_eligible, "everyone is in at 100%");
        }
    }

    #[test]
    fn roughly_uniform_spread() {
        let eligible = (0..1000)
            .filter(|_| is_eligible(&entry(Some(30)), &ClientIdentity::generate()))
            .count();
        // 30% of 1000 with generous slack.
        assert!((200..=400).contains(&eligible), "got {eligible}");
    }
}
