//! Release-feed data model and wire format for the rollout update core.
//!
//! This crate is pure data: digest newtypes, the artifact file-name
//! convention, the line-oriented feed codec, and the staged-rollout
//! eligibility filter. No I/O and no async live here.

pub mod entry;
pub mod feed;
pub mod hash;
pub mod name;
pub mod staging;

pub use entry::ReleaseEntry;
pub use feed::{Feed, FeedError};
pub use hash::Sha1Hash;
pub use name::{ArtifactKind, ArtifactName};
pub use staging::ClientIdentity;
