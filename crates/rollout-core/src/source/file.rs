use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rollout_schema::{ArtifactName, Feed, ReleaseEntry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{UpdateSource, feed_file_name, part_path, verify_length};
use crate::error::{SourceError, SourceErrorKind};
use crate::reporter::Reporter;

/// Retrieves updates from a local or network-attached directory.
///
/// The directory holds the feed index file and the artifact files by
/// their feed names. If the index is missing but packages are present,
/// the feed is synthesized from directory contents (degraded mode).
#[derive(Debug, Clone)]
pub struct FileSource {
    base_dir: PathBuf,
}

impl FileSource {
    /// Create a source over `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    async fn synthesize_feed(&self, channel: &str) -> Result<String, SourceError> {
        let base = self.base_dir.clone();
        let wanted = channel.to_string();
        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<ReleaseEntry>, SourceError> {
            let mut out = Vec::new();
            for item in std::fs::read_dir(&base)? {
                let item = item?;
                let Some(file_name) = item.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let Ok(name) = ArtifactName::parse(&file_name) else {
                    continue;
                };
                if name.channel != wanted {
                    continue;
                }
                let entry = ReleaseEntry::for_file(&item.path()).map_err(|e| {
                    SourceError::fatal(SourceErrorKind::Protocol(format!("{e:#}")))
                })?;
                out.push(entry);
            }
            // read_dir order is platform-defined; make the feed stable.
            out.sort_by(|a, b| a.file_name.cmp(&b.file_name));
            Ok(out)
        })
        .await
        .map_err(|e| SourceError::fatal(SourceErrorKind::Io(std::io::Error::other(e))))??;

        if entries.is_empty() {
            return Err(SourceError::fatal(SourceErrorKind::FeedMissing(format!(
                "'{}' has no feed file and no packages for channel '{channel}'",
                self.base_dir.display()
            ))));
        }

        warn!(
            dir = %self.base_dir.display(),
            channel,
            "feed file missing but packages are present; synthesizing feed from directory contents"
        );
        let feed = Feed::from_entries(entries)
            .map_err(|e| SourceError::fatal(SourceErrorKind::Protocol(e.to_string())))?;
        Ok(feed.encode())
    }
}

#[async_trait]
impl UpdateSource for FileSource {
    async fn release_feed(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::cancelled());
        }
        let path = self.base_dir.join(feed_file_name(channel));
        debug!(path = %path.display(), "reading feed");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.synthesize_feed(channel).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(
        &self,
        entry: &ReleaseEntry,
        dest: &Path,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::cancelled());
        }
        let src = self.base_dir.join(&entry.file_name);
        if !tokio::fs::try_exists(&src).await? {
            return Err(SourceError::fatal(SourceErrorKind::ArtifactMissing(
                entry.file_name.clone(),
            )));
        }

        let part = part_path(dest);
        let copied = tokio::fs::copy(&src, &part).await?;
        if let Err(e) = verify_length(entry, copied) {
            tokio::fs::remove_file(&part).await.ok();
            return Err(e);
        }
        tokio::fs::rename(&part, dest).await?;
        reporter.fetching(entry, 100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use rollout_schema::Sha1Hash;

    fn write_artifact(dir: &Path, name: &str, bytes: &[u8]) {
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[tokio::test]
    async fn reads_feed_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("releases.stable.txt"), "# empty\n").unwrap();
        let source = FileSource::new(dir.path());
        let text = source
            .release_feed("stable", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "# empty\n");
    }

    #[tokio::test]
    async fn synthesizes_feed_from_packages() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "notes-1.0.0-full-stable.pkg", b"v1 bytes");
        write_artifact(dir.path(), "notes-2.0.0-full-beta.pkg", b"beta bytes");
        write_artifact(dir.path(), "unrelated.txt", b"junk");

        let source = FileSource::new(dir.path());
        let text = source
            .release_feed("stable", &CancellationToken::new())
            .await
            .unwrap();
        let feed = Feed::decode(&text).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.entries()[0].file_name, "notes-1.0.0-full-stable.pkg");
        assert_eq!(feed.entries()[0].sha1, Sha1Hash::compute(b"v1 bytes"));
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path());
        let err = source
            .release_feed("stable", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), SourceErrorKind::FeedMissing(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fetch_copies_and_verifies_length() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "notes-1.0.0-full-stable.pkg", b"v1 bytes");
        let entry = ReleaseEntry::for_file(&dir.path().join("notes-1.0.0-full-stable.pkg")).unwrap();

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join(&entry.file_name);
        FileSource::new(dir.path())
            .fetch(&entry, &dest, &NullReporter, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"v1 bytes");
    }

    #[tokio::test]
    async fn fetch_size_mismatch_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "notes-1.0.0-full-stable.pkg", b"v1 bytes");
        let mut entry =
            ReleaseEntry::for_file(&dir.path().join("notes-1.0.0-full-stable.pkg")).unwrap();
        entry.file_size += 1;

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join(&entry.file_name);
        let err = FileSource::new(dir.path())
            .fetch(&entry, &dest, &NullReporter, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), SourceErrorKind::SizeMismatch { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn cancelled_fetch_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "notes-1.0.0-full-stable.pkg", b"v1 bytes");
        let entry = ReleaseEntry::for_file(&dir.path().join("notes-1.0.0-full-stable.pkg")).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = tempfile::tempdir().unwrap();
        let err = FileSource::new(dir.path())
            .fetch(&entry, &out.path().join(&entry.file_name), &NullReporter, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
