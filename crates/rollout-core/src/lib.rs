pub mod applier;
pub mod error;
pub mod planner;
pub mod resolver;
pub mod signing;
pub mod source;

pub mod reporter;

pub use applier::{ApplyError, BasePackageProvider, PatchTransform, TransformError};
pub use error::{SourceError, SourceErrorKind};
pub use planner::{DeltaPolicy, PlanError, UpdatePlan, plan};
pub use reporter::{NullReporter, Reporter};
pub use signing::{HmacSigner, RequestSigner};

pub use resolver::{
    ResolveError, ResolveErrorKind, ResolveRequest, ResolvedUpdate, Stage, Target, UpdateResolver,
};
pub use source::{
    FileSource, HostedReleasesSource, HttpSource, ObjectStoreSource, UpdateSource, feed_file_name,
};

/// User Agent string for HTTP operations
pub const USER_AGENT: &str = concat!("rollout/", env!("CARGO_PKG_VERSION"));
