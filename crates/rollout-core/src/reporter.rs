//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific TUI or GUI implementation.

use rollout_schema::ReleaseEntry;

/// Receives progress and status events from sources and the resolver.
///
/// Fetch progress for any one entry is reported from a single logical
/// operation: values are monotonically non-decreasing 0-100 and never
/// arrive concurrently for the same fetch.
pub trait Reporter: Send + Sync {
    /// Updates the progress of an artifact fetch (percent, 0-100).
    fn fetching(&self, entry: &ReleaseEntry, percent: u8);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn fetching(&self, entry: &ReleaseEntry, percent: u8) {
        (**self).fetching(entry, percent);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn fetching(&self, _: &ReleaseEntry, _: u8) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}
