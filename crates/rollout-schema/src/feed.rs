use std::collections::HashSet;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::entry::ReleaseEntry;
use crate::hash::Sha1Hash;
use crate::name::ArtifactKind;
use crate::staging::ClientIdentity;

/// Lines beginning with this marker are ignored by the decoder.
pub const COMMENT_MARKER: char = '#';

/// Errors that can occur when decoding a feed.
///
/// A feed that fails to decode must be treated as invalid by the caller;
/// none of these are retryable.
#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    /// A line does not have 3 or 4 space-separated fields.
    #[error("line {line}: expected 'sha1 fileName fileSize [stagingPercentage]', got {found} fields")]
    FieldCount {
        /// 1-based line number.
        line: usize,
        /// Number of fields found.
        found: usize,
    },

    /// The digest field is not a valid SHA-1 hex string.
    #[error("line {line}: {source}")]
    Digest {
        /// 1-based line number.
        line: usize,
        /// The underlying digest error.
        source: crate::hash::HashError,
    },

    /// The file name does not follow the artifact naming convention.
    #[error("line {line}: {source}")]
    FileName {
        /// 1-based line number.
        line: usize,
        /// The underlying name error.
        source: crate::name::NameError,
    },

    /// The size field is not a non-negative integer.
    #[error("line {line}: invalid file size '{value}'")]
    Size {
        /// 1-based line number.
        line: usize,
        /// The offending field.
        value: String,
    },

    /// The staging percentage is not an integer in 0-100.
    #[error("line {line}: invalid staging percentage '{value}' (must be 0-100)")]
    Percentage {
        /// 1-based line number.
        line: usize,
        /// The offending field.
        value: String,
    },

    /// Two entries share the same SHA-1 digest.
    #[error("duplicate digest {sha1} (entry '{file_name}')")]
    DuplicateDigest {
        /// The repeated digest.
        sha1: Sha1Hash,
        /// The second entry carrying it.
        file_name: String,
    },

    /// Two full entries for one version, or two deltas for one edge.
    #[error("conflicting entries for '{file_name}': only one artifact per version/edge is allowed")]
    ConflictingEntry {
        /// The second entry for the version or edge.
        file_name: String,
    },
}

/// The parsed list of available release artifacts for one channel.
///
/// A feed is a value object: it is rebuilt from the remote text on every
/// resolution and never cached across calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    entries: Vec<ReleaseEntry>,
}

impl Feed {
    /// Assemble a feed from entries, enforcing the feed invariants
    /// (unique digests, one full entry per version, one delta per edge).
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::DuplicateDigest`] or
    /// [`FeedError::ConflictingEntry`] on violation.
    pub fn from_entries(entries: Vec<ReleaseEntry>) -> Result<Self, FeedError> {
        let mut digests = HashSet::new();
        let mut slots = HashSet::new();
        for entry in &entries {
            if !digests.insert(entry.sha1.clone()) {
                return Err(FeedError::DuplicateDigest {
                    sha1: entry.sha1.clone(),
                    file_name: entry.file_name.clone(),
                });
            }
            // One full artifact per (package, channel, version); one delta
            // per (package, channel, base -> version) edge.
            let slot = (
                entry.name.package_id.clone(),
                entry.name.channel.clone(),
                entry.name.version.clone(),
                entry.name.delta_base().cloned(),
            );
            if !slots.insert(slot) {
                return Err(FeedError::ConflictingEntry {
                    file_name: entry.file_name.clone(),
                });
            }
        }
        Ok(Self { entries })
    }

    /// Decode the feed text format.
    ///
    /// One entry per line, fields separated by a single space, in order
    /// `sha1 fileName fileSize [stagingPercentage]`. Blank lines and lines
    /// beginning with `#` are ignored; trailing whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] naming the first malformed line or
    /// invariant violation. Decoding never panics.
    pub fn decode(text: &str) -> Result<Self, FeedError> {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim_end();
            if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
                continue;
            }

            let fields: Vec<&str> = trimmed.split(' ').collect();
            if fields.len() < 3 || fields.len() > 4 {
                return Err(FeedError::FieldCount {
                    line,
                    found: fields.len(),
                });
            }

            let sha1 =
                Sha1Hash::parse(fields[0]).map_err(|source| FeedError::Digest { line, source })?;
            let name = crate::name::ArtifactName::parse(fields[1])
                .map_err(|source| FeedError::FileName { line, source })?;
            let file_size: u64 = fields[2].parse().map_err(|_| FeedError::Size {
                line,
                value: fields[2].to_string(),
            })?;
            let staging_percentage = match fields.get(3) {
                Some(field) => {
                    let pct: u8 = field.parse().map_err(|_| FeedError::Percentage {
                        line,
                        value: (*field).to_string(),
                    })?;
                    if pct > 100 {
                        return Err(FeedError::Percentage {
                            line,
                            value: (*field).to_string(),
                        });
                    }
                    Some(pct)
                }
                None => None,
            };

            entries.push(ReleaseEntry {
                sha1,
                file_name: fields[1].to_string(),
                file_size,
                staging_percentage,
                name,
            });
        }
        Self::from_entries(entries)
    }

    /// Encode the feed into its text format.
    ///
    /// Fields are always emitted in fixed order; the percentage field is
    /// omitted when unset (`Some(0)` is encoded explicitly as `0`, which is
    /// distinct from "always eligible").
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry.sha1.as_str());
            out.push(' ');
            out.push_str(&entry.file_name);
            out.push(' ');
            out.push_str(&entry.file_size.to_string());
            if let Some(pct) = entry.staging_percentage {
                out.push(' ');
                out.push_str(&pct.to_string());
            }
            out.push('\n');
        }
        out
    }

    /// All entries in feed order.
    pub fn entries(&self) -> &[ReleaseEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the feed has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The full-package entry for `version`, if present.
    pub fn full_entry(&self, version: &Version) -> Option<&ReleaseEntry> {
        self.entries
            .iter()
            .find(|e| e.name.kind == ArtifactKind::Full && e.name.version == *version)
    }

    /// All delta entries, as `(base, target, entry)` edges.
    pub fn delta_edges(&self) -> impl Iterator<Item = (&Version, &Version, &ReleaseEntry)> {
        self.entries
            .iter()
            .filter_map(|e| e.name.delta_base().map(|base| (base, &e.name.version, e)))
    }

    /// The highest version any entry produces.
    pub fn latest_version(&self) -> Option<&Version> {
        self.entries.iter().map(|e| &e.name.version).max()
    }

    /// Prune entries this client is not staged into.
    ///
    /// Entries without a staging percentage always survive.
    pub fn apply_staging(&self, id: &ClientIdentity) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|e| crate::staging::is_eligible(e, id))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file_name: &str, size: u64) -> ReleaseEntry {
        ReleaseEntry::new(Sha1Hash::compute(file_name.as_bytes()), file_name, size).unwrap()
    }

    fn sample_feed() -> Feed {
        Feed::from_entries(vec![
            entry("notes-1.0.0-full-stable.pkg", 1000),
            entry("notes-2.0.0-full-stable.pkg", 1200),
            entry("notes-2.0.0-delta.1.0.0-stable.pkg", 100).with_staging_percentage(25),
        ])
        .unwrap()
    }

    #[test]
    fn round_trip() {
        let feed = sample_feed();
        let decoded = Feed::decode(&feed.encode()).unwrap();
        assert_eq!(decoded, feed);
    }

    #[test]
    fn zero_percent_survives_round_trip() {
        let feed =
            Feed::from_entries(vec![
                entry("notes-1.0.0-full-stable.pkg", 10).with_staging_percentage(0)
            ])
            .unwrap();
        let text = feed.encode();
        assert!(text.trim_end().ends_with(" 0"));
        let decoded = Feed::decode(&text).unwrap();
        assert_eq!(decoded.entries()[0].staging_percentage, Some(0));
    }

    #[test]
    fn skips_comments_blank_lines_and_trailing_whitespace() {
        let inner = sample_feed().encode();
        let text = format!("# generated feed\n\n{}\n", inner.replace('\n', "  \n"));
        let decoded = Feed::decode(&text).unwrap();
        assert_eq!(decoded.len(), 3);
    }

    #[test]
    fn rejects_malformed_digest() {
        let err = Feed::decode("notdeadbeef notes-1.0.0-full-stable.pkg 10").unwrap_err();
        assert!(matches!(err, FeedError::Digest { line: 1, .. }));
    }

    #[test]
    fn rejects_bad_size_and_percentage() {
        let sha = Sha1Hash::compute(b"a");
        let err = Feed::decode(&format!("{sha} notes-1.0.0-full-stable.pkg ten")).unwrap_err();
        assert!(matches!(err, FeedError::Size { .. }));

        let err = Feed::decode(&format!("{sha} notes-1.0.0-full-stable.pkg 10 101")).unwrap_err();
        assert!(matches!(err, FeedError::Percentage { .. }));

        let err = Feed::decode(&format!("{sha} notes-1.0.0-full-stable.pkg 10 -1")).unwrap_err();
        assert!(matches!(err, FeedError::Percentage { .. }));
    }

    #[test]
    fn rejects_duplicate_digest() {
        let sha = Sha1Hash::compute(b"same");
        let text = format!(
            "{sha} notes-1.0.0-full-stable.pkg 10\n{sha} notes-2.0.0-full-stable.pkg 20\n"
        );
        assert!(matches!(
            Feed::decode(&text).unwrap_err(),
            FeedError::DuplicateDigest { .. }
        ));
    }

    #[test]
    fn rejects_conflicting_full_entries() {
        let a = Sha1Hash::compute(b"a");
        let b = Sha1Hash::compute(b"b");
        let text = format!(
            "{a} notes-1.0.0-full-stable.pkg 10\n{b} notes-1.0.0-full-stable.pkg 20\n"
        );
        assert!(matches!(
            Feed::decode(&text).unwrap_err(),
            FeedError::ConflictingEntry { .. }
        ));
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = Feed::decode("onlyonefield").unwrap_err();
        assert!(matches!(err, FeedError::FieldCount { found: 1, .. }));
    }

    #[test]
    fn indexes_versions() {
        let feed = sample_feed();
        let v2 = Version::new(2, 0, 0);
        assert!(feed.full_entry(&v2).is_some());
        assert_eq!(feed.delta_edges().count(), 1);
        assert_eq!(feed.latest_version(), Some(&v2));
    }
}
