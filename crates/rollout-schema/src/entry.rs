use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hash::Sha1Hash;
use crate::name::ArtifactName;

/// One line of the release feed: an artifact available for download.
///
/// The derived [`ArtifactName`] fields (package id, version, delta base,
/// channel) are parsed from `file_name` at decode time and never encoded
/// redundantly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    /// SHA-1 digest of the artifact's full bytes; identity and integrity key.
    pub sha1: Sha1Hash,
    /// Artifact file name, following the rollout naming convention.
    pub file_name: String,
    /// Artifact size in bytes.
    pub file_size: u64,
    /// Fraction of clients eligible (0-100); `None` means always eligible.
    pub staging_percentage: Option<u8>,
    /// Structured form of `file_name`.
    pub name: ArtifactName,
}

impl ReleaseEntry {
    /// Build an entry from an artifact name and metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if `file_name` does not follow the naming
    /// convention.
    pub fn new(sha1: Sha1Hash, file_name: impl Into<String>, file_size: u64) -> Result<Self> {
        let file_name = file_name.into();
        let name = ArtifactName::parse(&file_name)
            .with_context(|| format!("invalid artifact name '{file_name}'"))?;
        Ok(Self {
            sha1,
            file_name,
            file_size,
            staging_percentage: None,
            name,
        })
    }

    /// Set the staging percentage, clamped to the 0-100 range by the caller.
    pub fn with_staging_percentage(mut self, percentage: u8) -> Self {
        self.staging_percentage = Some(percentage);
        self
    }

    /// Hash and measure a local artifact file to build its feed entry.
    ///
    /// Used by publishers and by the file source when synthesizing a feed
    /// from a bare directory of packages.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its name does not
    /// follow the naming convention.
    pub fn for_file(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("artifact path '{}' has no file name", path.display()))?
            .to_string();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read artifact '{}'", path.display()))?;
        Self::new(Sha1Hash::compute(&bytes), file_name, bytes.len() as u64)
    }

    /// Returns true if this entry is a delta patch.
    pub fn is_delta(&self) -> bool {
        self.name.kind.is_delta()
    }

    /// The version this entry produces.
    pub fn version(&self) -> &semver::Version {
        &self.name.version
    }
}
