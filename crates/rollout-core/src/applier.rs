//! Patch-chain application and integrity verification.
//!
//! The binary-diff algorithm itself is pluggable: a [`PatchTransform`]
//! turns (old bytes, patch bytes) into new bytes. This module reduces a
//! plan left-to-right through that transform. Every fetched artifact is
//! verified against its own entry's digest before use, and each package
//! produced by a patch step is verified against the feed's full-package
//! entry for that version when one exists. An integrity failure abandons
//! the chain immediately; nothing is retried and no output is produced.

use std::path::Path;

use rollout_schema::{ArtifactKind, Feed, ReleaseEntry, Sha1Hash};
use semver::Version;
use tracing::debug;

use crate::planner::UpdatePlan;

/// A failure inside a patch transform, distinct from integrity failures.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub String);

/// The pluggable byte transform: old bytes + patch bytes -> new bytes.
pub trait PatchTransform: Send + Sync {
    /// Apply `patch` on top of `base`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransformError`] when the patch cannot be applied.
    fn apply(&self, base: &[u8], patch: &[u8]) -> Result<Vec<u8>, TransformError>;
}

/// Supplies the currently-installed package's bytes for delta chains that
/// start from the installed version.
pub trait BasePackageProvider: Send + Sync {
    /// The full package bytes for `version`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::BaseMissing`] (or an I/O error) when the
    /// installed package cannot be produced.
    fn base_bytes(&self, version: &Version) -> Result<Vec<u8>, ApplyError>;
}

/// Errors that can occur while applying a plan.
#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    /// Bytes did not match a digest declared in the feed.
    ///
    /// Raised for a fetched artifact whose content does not match its own
    /// entry, or for a patched result that does not match the full entry
    /// for its version. Fatal for the current plan; the caller may fall
    /// back to a full-package plan.
    #[error("integrity failure on '{file_name}': expected sha1 {expected}, got {actual}")]
    Integrity {
        /// The feed entry whose verification failed.
        file_name: String,
        /// Digest declared in the feed.
        expected: Sha1Hash,
        /// Digest of the bytes actually seen.
        actual: Sha1Hash,
    },

    /// Bytes did not match a size declared in the feed.
    #[error("size mismatch on '{file_name}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// The feed entry whose verification failed.
        file_name: String,
        /// Size declared in the feed.
        expected: u64,
        /// Size of the bytes actually seen.
        actual: u64,
    },

    /// The patch transform itself failed.
    #[error("patch transform failed on '{file_name}': {reason}")]
    Transform {
        /// The delta entry being applied.
        file_name: String,
        /// The transform's failure message.
        reason: String,
    },

    /// No installed package bytes are available for the chain's base.
    #[error("no base package available for version {0}")]
    BaseMissing(Version),

    /// A full-package entry appeared after the first chain position.
    #[error("plan entry '{0}' is a full package but not first in the chain")]
    UnexpectedFull(String),

    /// The plan contains no entries.
    #[error("the plan contains no entries")]
    EmptyPlan,

    /// Reading a fetched artifact failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reduce a fetched plan to the final package bytes.
///
/// Artifacts are read from `artifact_dir` by their feed file names; all
/// fetches must have completed before this is called. `feed` supplies
/// the full-package entries used to verify what each patch step
/// produces, so corrupting any delta in the chain fails at exactly that
/// entry.
///
/// # Errors
///
/// Returns an [`ApplyError`]; on error no output bytes are returned and
/// nothing has been written anywhere.
pub fn apply_chain(
    plan: &UpdatePlan,
    feed: &Feed,
    artifact_dir: &Path,
    base: &dyn BasePackageProvider,
    transform: &dyn PatchTransform,
) -> Result<Vec<u8>, ApplyError> {
    let entries = plan.entries();
    let first = entries.first().ok_or(ApplyError::EmptyPlan)?;

    let mut current = match &first.name.kind {
        ArtifactKind::Full => read_verified(artifact_dir, first)?,
        ArtifactKind::Delta { base: base_version } => {
            let base_bytes = base.base_bytes(base_version)?;
            apply_one(&base_bytes, first, feed, artifact_dir, transform)?
        }
    };

    for entry in &entries[1..] {
        if !entry.is_delta() {
            return Err(ApplyError::UnexpectedFull(entry.file_name.clone()));
        }
        current = apply_one(&current, entry, feed, artifact_dir, transform)?;
    }

    debug!(
        target = %plan.target_version(),
        bytes = current.len(),
        "chain applied and verified"
    );
    Ok(current)
}

/// Read a fetched artifact and check it against its own entry.
fn read_verified(artifact_dir: &Path, entry: &ReleaseEntry) -> Result<Vec<u8>, ApplyError> {
    let bytes = std::fs::read(artifact_dir.join(&entry.file_name))?;
    if bytes.len() as u64 != entry.file_size {
        return Err(ApplyError::SizeMismatch {
            file_name: entry.file_name.clone(),
            expected: entry.file_size,
            actual: bytes.len() as u64,
        });
    }
    let actual = Sha1Hash::compute(&bytes);
    if actual != entry.sha1 {
        return Err(ApplyError::Integrity {
            file_name: entry.file_name.clone(),
            expected: entry.sha1.clone(),
            actual,
        });
    }
    Ok(bytes)
}

fn apply_one(
    base: &[u8],
    entry: &ReleaseEntry,
    feed: &Feed,
    artifact_dir: &Path,
    transform: &dyn PatchTransform,
) -> Result<Vec<u8>, ApplyError> {
    let patch = read_verified(artifact_dir, entry)?;
    let next = transform
        .apply(base, &patch)
        .map_err(|e| ApplyError::Transform {
            file_name: entry.file_name.clone(),
            reason: e.to_string(),
        })?;

    // A delta-only version carries no reference digest; the patch bytes
    // themselves were already verified above.
    if let Some(full) = feed.full_entry(&entry.name.version) {
        if next.len() as u64 != full.file_size {
            return Err(ApplyError::SizeMismatch {
                file_name: entry.file_name.clone(),
                expected: full.file_size,
                actual: next.len() as u64,
            });
        }
        let actual = Sha1Hash::compute(&next);
        if actual != full.sha1 {
            return Err(ApplyError::Integrity {
                file_name: entry.file_name.clone(),
                expected: full.sha1.clone(),
                actual,
            });
        }
    }
    Ok(next)
}
