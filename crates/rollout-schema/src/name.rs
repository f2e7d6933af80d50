use semver::Version;
use serde::{Deserialize, Serialize};

/// Whether an artifact carries a complete package or a delta patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// A self-contained package for its version.
    Full,
    /// A patch transforming the package at `base` into this version.
    Delta {
        /// The version the patch applies on top of.
        base: Version,
    },
}

impl ArtifactKind {
    /// Returns true for [`ArtifactKind::Delta`].
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Delta { .. })
    }
}

/// The structured form of an artifact file name.
///
/// The wire convention is:
///
/// ```text
/// {packageId}-{version}-full-{channel}{ext}
/// {packageId}-{version}-delta.{baseVersion}-{channel}{ext}
/// ```
///
/// `packageId` may contain hyphens but never a hyphen followed by an ASCII
/// digit (that sequence marks the version boundary). `channel` is a single
/// token without hyphens or dots. Versions are semver; prerelease tags are
/// handled by locating the `-full-` / `-delta.` marker from the right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactName {
    /// Package identifier, e.g. `acme-notes`.
    pub package_id: String,
    /// The version this artifact produces.
    pub version: Version,
    /// Full package or delta patch.
    pub kind: ArtifactKind,
    /// Release channel, e.g. `stable`.
    pub channel: String,
    /// File extension including the leading dot, e.g. `.pkg`.
    pub ext: String,
}

/// Errors that can occur when parsing an [`ArtifactName`].
#[derive(thiserror::Error, Debug)]
pub enum NameError {
    /// The name has no `.` extension separator.
    #[error("artifact name '{0}' has no file extension")]
    MissingExtension(String),

    /// No channel segment after the full/delta marker.
    #[error("artifact name '{0}' has no channel segment")]
    MissingChannel(String),

    /// Neither a `-full-` nor a `-delta.` marker is present.
    #[error("artifact name '{0}' has no 'full' or 'delta' marker")]
    MissingMarker(String),

    /// The package id portion is empty.
    #[error("artifact name '{0}' has an empty package id")]
    EmptyPackageId(String),

    /// A version segment failed semver parsing.
    #[error("artifact name '{name}' has an invalid version '{version}': {source}")]
    BadVersion {
        /// The full artifact name being parsed.
        name: String,
        /// The offending version segment.
        version: String,
        /// The underlying semver error.
        source: semver::Error,
    },
}

impl ArtifactName {
    /// Parse an artifact file name into its structured form.
    ///
    /// # Errors
    ///
    /// Returns a [`NameError`] describing the first malformed segment.
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let dot = name
            .rfind('.')
            .ok_or_else(|| NameError::MissingExtension(name.to_string()))?;
        let (stem, ext) = name.split_at(dot);

        let dash = stem
            .rfind('-')
            .ok_or_else(|| NameError::MissingChannel(name.to_string()))?;
        let channel = &stem[dash + 1..];
        let rest = &stem[..dash];
        if channel.is_empty() {
            return Err(NameError::MissingChannel(name.to_string()));
        }

        // Marker scan runs right-to-left so hyphens inside semver prerelease
        // tags cannot be mistaken for segment boundaries.
        let (head, kind) = if let Some(prefix) = rest.strip_suffix("-full") {
            (prefix, ArtifactKind::Full)
        } else if let Some(idx) = rest.rfind("-delta.") {
            let base_str = &rest[idx + "-delta.".len()..];
            let base = parse_version(name, base_str)?;
            (&rest[..idx], ArtifactKind::Delta { base })
        } else {
            return Err(NameError::MissingMarker(name.to_string()));
        };

        // The version starts at the first hyphen followed by a digit.
        let boundary = head
            .char_indices()
            .find(|&(i, c)| {
                c == '-'
                    && head[i + 1..]
                        .chars()
                        .next()
                        .is_some_and(|n| n.is_ascii_digit())
            })
            .map(|(i, _)| i)
            .ok_or_else(|| NameError::MissingMarker(name.to_string()))?;

        let package_id = &head[..boundary];
        if package_id.is_empty() {
            return Err(NameError::EmptyPackageId(name.to_string()));
        }
        let version = parse_version(name, &head[boundary + 1..])?;

        Ok(Self {
            package_id: package_id.to_string(),
            version,
            kind,
            channel: channel.to_string(),
            ext: ext.to_string(),
        })
    }

    /// The delta base version, if this is a delta artifact.
    pub fn delta_base(&self) -> Option<&Version> {
        match &self.kind {
            ArtifactKind::Delta { base } => Some(base),
            ArtifactKind::Full => None,
        }
    }
}

fn parse_version(name: &str, segment: &str) -> Result<Version, NameError> {
    Version::parse(segment).map_err(|source| NameError::BadVersion {
        name: name.to_string(),
        version: segment.to_string(),
        source,
    })
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let marker = match &self.kind {
            ArtifactKind::Full => "full".to_string(),
            ArtifactKind::Delta { base } => format!("delta.{base}"),
        };
        write!(
            f,
            "{}-{}-{}-{}{}",
            self.package_id, self.version, marker, self.channel, self.ext
        )
    }
}
