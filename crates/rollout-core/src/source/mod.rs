//! Transport-agnostic retrieval of feeds and artifacts.
//!
//! One capability trait, four independent implementations selected at
//! construction time: local disk, HTTP, object storage, and a hosted
//! releases API. No shared base type and no runtime type inspection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rollout_schema::ReleaseEntry;
use tokio_util::sync::CancellationToken;

use crate::error::{SourceError, SourceErrorKind};
use crate::reporter::Reporter;

mod file;
mod hosted;
mod http;
mod object;

pub use file::FileSource;
pub use hosted::HostedReleasesSource;
pub use http::HttpSource;
pub use object::ObjectStoreSource;

/// Capability interface for retrieving the feed and artifact bytes.
///
/// All variants surface failures as [`SourceError`] with a
/// retryable/non-retryable classification; the rest of the core never
/// interprets transport-specific status codes.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Retrieve the raw feed text for `channel`.
    async fn release_feed(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SourceError>;

    /// Download one artifact to `dest`.
    ///
    /// Implementations must verify the received byte count against
    /// `entry.file_size` before declaring success (content-hash
    /// verification is the caller's job), stage the download in a `.part`
    /// file, and only rename it to `dest` once complete. Progress is
    /// reported as monotonically non-decreasing percentages.
    async fn fetch(
        &self,
        entry: &ReleaseEntry,
        dest: &Path,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError>;
}

/// The feed index file name for a channel.
pub fn feed_file_name(channel: &str) -> String {
    format!("releases.{channel}.txt")
}

/// The staging path a download is written to before it is made visible.
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_os_string();
    os.push(".part");
    PathBuf::from(os)
}

/// Check a completed download's length against the feed entry.
pub(crate) fn verify_length(entry: &ReleaseEntry, actual: u64) -> Result<(), SourceError> {
    if actual == entry.file_size {
        Ok(())
    } else {
        Err(SourceError::fatal(SourceErrorKind::SizeMismatch {
            file_name: entry.file_name.clone(),
            expected: entry.file_size,
            actual,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_name_is_channel_scoped() {
        assert_eq!(feed_file_name("stable"), "releases.stable.txt");
        assert_eq!(feed_file_name("beta"), "releases.beta.txt");
    }

    #[test]
    fn part_path_appends_suffix() {
        let p = part_path(Path::new("/tmp/a-1.0.0-full-stable.pkg"));
        assert_eq!(p, Path::new("/tmp/a-1.0.0-full-stable.pkg.part"));
    }
}
