//! Transport error type shared by every [`UpdateSource`] variant.
//!
//! [`UpdateSource`]: crate::source::UpdateSource

/// A network or storage failure surfaced by a source.
///
/// Each variant maps its transport's protocol-specific failures into this
/// type; callers only ever see the retryable/non-retryable classification,
/// never raw status codes.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct SourceError {
    kind: SourceErrorKind,
    retryable: bool,
}

/// What went wrong inside a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceErrorKind {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Object-storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] opendal::Error),

    /// Local filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel feed does not exist at the source.
    #[error("feed not found: {0}")]
    FeedMissing(String),

    /// A planned artifact does not exist at the source.
    #[error("artifact not found: {0}")]
    ArtifactMissing(String),

    /// The downloaded byte count does not match the feed entry.
    #[error("size mismatch for '{file_name}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// The artifact file name.
        file_name: String,
        /// Expected size from the feed entry.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// The remote answered with something the source cannot interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl SourceError {
    /// A failure worth retrying (timeouts, connection resets, 5xx).
    pub fn retryable(kind: impl Into<SourceErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away on its own.
    pub fn fatal(kind: impl Into<SourceErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            retryable: false,
        }
    }

    /// A cancellation surfaced through the source.
    pub fn cancelled() -> Self {
        Self::fatal(SourceErrorKind::Cancelled)
    }

    /// Whether the caller may usefully retry the operation.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Whether this failure is a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, SourceErrorKind::Cancelled)
    }

    /// The underlying failure.
    pub fn kind(&self) -> &SourceErrorKind {
        &self.kind
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts, connect failures and server errors are transient;
        // everything else (4xx, decode, builder) is not.
        let retryable = err.is_timeout()
            || err.is_connect()
            || err.status().is_some_and(|s| s.is_server_error());
        Self {
            kind: SourceErrorKind::Http(err),
            retryable,
        }
    }
}

impl From<opendal::Error> for SourceError {
    fn from(err: opendal::Error) -> Self {
        let retryable = err.is_temporary();
        Self {
            kind: SourceErrorKind::Storage(err),
            retryable,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        Self::fatal(SourceErrorKind::Io(err))
    }
}
