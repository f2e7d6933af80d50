use std::path::Path;

use async_trait::async_trait;
use opendal::Operator;
use rollout_schema::ReleaseEntry;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{UpdateSource, feed_file_name, part_path, verify_length};
use crate::error::{SourceError, SourceErrorKind};
use crate::reporter::Reporter;

/// Retrieves updates from an object store (S3 and friends) through an
/// [`opendal::Operator`].
///
/// Bucket selection and credentials are the caller's concern: the
/// operator arrives fully configured; this source only issues reads under
/// its key prefix.
#[derive(Debug, Clone)]
pub struct ObjectStoreSource {
    op: Operator,
    prefix: String,
}

impl ObjectStoreSource {
    /// Create a source reading keys under `prefix` (may be empty).
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        Self {
            op,
            prefix: prefix.into(),
        }
    }

    fn key_for(&self, name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }

    async fn read_key(
        &self,
        key: &str,
        cancel: &CancellationToken,
        missing: impl FnOnce(String) -> SourceErrorKind,
    ) -> Result<Vec<u8>, SourceError> {
        let bytes = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::cancelled()),
            r = self.op.read(key) => r,
        };
        bytes.map_err(|e| {
            if e.kind() == opendal::ErrorKind::NotFound {
                SourceError::fatal(missing(key.to_string()))
            } else {
                e.into()
            }
        })
    }
}

#[async_trait]
impl UpdateSource for ObjectStoreSource {
    async fn release_feed(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SourceError> {
        let key = self.key_for(&feed_file_name(channel));
        debug!(key, "reading feed object");
        let bytes = self
            .read_key(&key, cancel, SourceErrorKind::FeedMissing)
            .await?;
        String::from_utf8(bytes).map_err(|_| {
            SourceError::fatal(SourceErrorKind::Protocol(format!(
                "feed object '{key}' is not valid UTF-8"
            )))
        })
    }

    async fn fetch(
        &self,
        entry: &ReleaseEntry,
        dest: &Path,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError> {
        let key = self.key_for(&entry.file_name);
        reporter.fetching(entry, 0);
        let bytes = self
            .read_key(&key, cancel, SourceErrorKind::ArtifactMissing)
            .await?;
        verify_length(entry, bytes.len() as u64)?;

        let part = part_path(dest);
        tokio::fs::write(&part, &bytes).await?;
        if cancel.is_cancelled() {
            tokio::fs::remove_file(&part).await.ok();
            return Err(SourceError::cancelled());
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

    fn memory_source(prefix: &str) -> ObjectStoreSource {
        let builder = opendal::services::Memory::default();
        let op = Operator::new(builder).unwrap().finish();
        ObjectStoreSource::new(op, prefix)
    }

    #[tokio::test]
    async fn reads_feed_under_prefix() {
        let source = memory_source("updates/stable");
        source
            .op
            .write("updates/stable/releases.stable.txt", "# feed\n")
            .await
            .unwrap();

        let text = source
            .release_feed("stable", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "# feed\n");
    }

    #[tokio::test]
    async fn missing_feed_is_fatal() {
        let err = memory_source("")
            .release_feed("stable", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), SourceErrorKind::FeedMissing(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fetch_verifies_length() {
        let source = memory_source("");
        let body = b"package bytes".to_vec();
        source
            .op
            .write("notes-1.0.0-full-stable.pkg", body.clone())
            .await
            .unwrap();

        let entry = ReleaseEntry::new(
            Sha1Hash::compute(&body),
            "notes-1.0.0-full-stable.pkg",
            body.len() as u64,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(&entry.file_name);
        source
            .fetch(&entry, &dest, &NullReporter, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), body);

        let mut wrong = entry.clone();
        wrong.file_size += 1;
        let err = source
            .fetch(&wrong, &dest, &NullReporter, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), SourceErrorKind::SizeMismatch { .. }));
    }
}
