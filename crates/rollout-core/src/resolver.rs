//! End-to-end update resolution.
//!
//! The resolver drives one attempt through a fixed progression of
//! stages: fetch the feed, decode it, filter by staging eligibility,
//! plan a delta chain, download the plan's artifacts, apply and verify
//! the chain, and publish the final package atomically. Any failure
//! carries the last stage that was successfully entered, so callers can
//! tell a transport problem from a bad feed or a corrupt patch.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use rollout_schema::{ArtifactKind, ArtifactName, ClientIdentity, Feed, FeedError};
use semver::Version;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::applier::{ApplyError, BasePackageProvider, PatchTransform, apply_chain};
use crate::error::SourceError;
use crate::planner::{DeltaPolicy, PlanError, UpdatePlan, plan};
use crate::reporter::Reporter;
use crate::source::UpdateSource;

/// How many artifact downloads run at once.
const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// The progression of one resolution attempt.
///
/// Stages only ever advance; an error is tagged with the last stage the
/// attempt entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Nothing has happened yet.
    Idle,
    /// Raw feed text retrieved from the source.
    FeedFetched,
    /// Feed decoded and pruned to entries this client is staged into.
    Filtered,
    /// An update plan exists.
    Planned,
    /// Plan artifacts are downloading.
    Fetching,
    /// The patch chain is being applied.
    Applying,
    /// The final package is verified and published.
    Verified,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::FeedFetched => "feed fetched",
            Stage::Filtered => "filtered",
            Stage::Planned => "planned",
            Stage::Fetching => "fetching",
            Stage::Applying => "applying",
            Stage::Verified => "verified",
        };
        f.write_str(s)
    }
}

/// What version a resolution should land on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The highest version visible after staging.
    Latest,
    /// A specific version.
    Version(Version),
}

/// Inputs for one resolution attempt.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Release channel to follow, e.g. `stable`.
    pub channel: String,
    /// Currently installed version, if any.
    pub installed: Option<Version>,
    /// Stable per-install identity used for staged-rollout bucketing.
    pub client_id: ClientIdentity,
    /// Which version to resolve toward.
    pub target: Target,
    /// Whether deltas may participate in the plan.
    pub policy: DeltaPolicy,
    /// Directory the final package is published into. Download staging
    /// happens in a temporary directory underneath it so the final
    /// rename stays on one filesystem.
    pub output_dir: PathBuf,
}

impl ResolveRequest {
    /// A request for the latest version on `channel`, deltas allowed.
    pub fn latest(
        channel: impl Into<String>,
        installed: Option<Version>,
        client_id: ClientIdentity,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            channel: channel.into(),
            installed,
            client_id,
            target: Target::Latest,
            policy: DeltaPolicy::Allow,
            output_dir: output_dir.into(),
        }
    }
}

/// A successful resolution: a verified full package on disk.
#[derive(Debug)]
pub struct ResolvedUpdate {
    plan: UpdatePlan,
    version: Version,
    package_path: PathBuf,
}

impl ResolvedUpdate {
    /// The plan that produced this package.
    pub fn plan(&self) -> &UpdatePlan {
        &self.plan
    }

    /// The version that was installed to disk.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Where the verified package was published.
    pub fn package_path(&self) -> &std::path::Path {
        &self.package_path
    }
}

/// A resolution failure, tagged with the stage it occurred in.
#[derive(thiserror::Error, Debug)]
#[error("update resolution failed while {stage}: {kind}")]
pub struct ResolveError {
    /// The last stage the attempt entered.
    pub stage: Stage,
    /// What went wrong.
    #[source]
    pub kind: ResolveErrorKind,
}

/// The failure classes a resolution can end in.
#[derive(thiserror::Error, Debug)]
pub enum ResolveErrorKind {
    /// The transport failed; check `is_retryable` on the inner error.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The feed text is malformed.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// No viable plan exists.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Applying the patch chain failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// The staged feed has nothing this client may install.
    #[error("no release is available to this client")]
    NothingAvailable,

    /// The installed version already satisfies the target.
    #[error("version {0} is already installed")]
    UpToDate(Version),

    /// The attempt's cancellation token fired.
    #[error("the operation was cancelled")]
    Cancelled,

    /// Writing the final package failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    fn new(stage: Stage, kind: impl Into<ResolveErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    /// True when the inner failure is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ResolveErrorKind::Cancelled)
    }
}

/// Drives resolution attempts against one [`UpdateSource`].
///
/// The resolver is stateless between attempts; every call to
/// [`UpdateResolver::resolve`] starts from [`Stage::Idle`].
pub struct UpdateResolver<R: Reporter> {
    source: Arc<dyn UpdateSource>,
    base: Arc<dyn BasePackageProvider>,
    transform: Arc<dyn PatchTransform>,
    reporter: R,
    fetch_concurrency: usize,
}

impl<R: Reporter> fmt::Debug for UpdateResolver<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateResolver")
            .field("fetch_concurrency", &self.fetch_concurrency)
            .finish_non_exhaustive()
    }
}

impl<R: Reporter> UpdateResolver<R> {
    /// Wire a resolver to its transport, patch machinery, and reporter.
    pub fn new(
        source: Arc<dyn UpdateSource>,
        base: Arc<dyn BasePackageProvider>,
        transform: Arc<dyn PatchTransform>,
        reporter: R,
    ) -> Self {
        Self {
            source,
            base,
            transform,
            reporter,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    /// Cap the number of concurrent artifact downloads.
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    /// Run one resolution attempt end to end.
    ///
    /// On success the verified package sits at the returned path, written
    /// via a temporary file and a final rename. On failure nothing is
    /// published and the error names the stage that failed; partial
    /// downloads may remain as resumable `.part` files inside a staging
    /// directory that is removed with it.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] for any failed or cancelled attempt,
    /// including the benign [`ResolveErrorKind::UpToDate`] and
    /// [`ResolveErrorKind::NothingAvailable`] outcomes.
    #[instrument(skip_all, fields(channel = %request.channel))]
    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedUpdate, ResolveError> {
        let mut stage = Stage::Idle;

        let text = self
            .source
            .release_feed(&request.channel, cancel)
            .await
            .map_err(|e| source_err(stage, e))?;
        stage = Stage::FeedFetched;

        let feed = Feed::decode(&text).map_err(|e| ResolveError::new(stage, e))?;
        debug!(entries = feed.len(), "feed decoded");

        let filtered = feed.apply_staging(&request.client_id);
        stage = Stage::Filtered;
        if filtered.is_empty() {
            return Err(ResolveError::new(stage, ResolveErrorKind::NothingAvailable));
        }

        let target = match &request.target {
            Target::Version(v) => v.clone(),
            Target::Latest => filtered
                .latest_version()
                .cloned()
                .ok_or_else(|| ResolveError::new(stage, ResolveErrorKind::NothingAvailable))?,
        };
        if let Some(installed) = &request.installed
            && *installed >= target
        {
            return Err(ResolveError::new(
                stage,
                ResolveErrorKind::UpToDate(installed.clone()),
            ));
        }

        let plan = plan(
            &filtered,
            request.installed.as_ref(),
            &target,
            request.policy,
        )
        .map_err(|e| ResolveError::new(stage, e))?;
        stage = Stage::Planned;
        info!(
            target = %target,
            artifacts = plan.entries().len(),
            bytes = plan.total_download_size(),
            full = plan.is_full_package(),
            "plan ready"
        );

        std::fs::create_dir_all(&request.output_dir)
            .map_err(|e| ResolveError::new(stage, e))?;
        let staging = tempfile::tempdir_in(&request.output_dir)
            .map_err(|e| ResolveError::new(stage, e))?;

        stage = Stage::Fetching;
        let mut fetches = stream::iter(plan.entries())
            .map(|entry| {
                let dest = staging.path().join(&entry.file_name);
                async move {
                    self.source
                        .fetch(entry, &dest, &self.reporter, cancel)
                        .await
                }
            })
            .buffer_unordered(self.fetch_concurrency);
        while let Some(result) = fetches.next().await {
            result.map_err(|e| source_err(stage, e))?;
        }
        drop(fetches);

        stage = Stage::Applying;
        if cancel.is_cancelled() {
            return Err(ResolveError::new(stage, ResolveErrorKind::Cancelled));
        }
        let bytes = apply_chain(
            &plan,
            &filtered,
            staging.path(),
            self.base.as_ref(),
            self.transform.as_ref(),
        )
        .map_err(|e| ResolveError::new(stage, e))?;

        let package_path = self
            .publish(&plan, request, &bytes)
            .map_err(|e| ResolveError::new(stage, e))?;
        stage = Stage::Verified;
        self.reporter
            .info(&format!("update {target} ready at {}", package_path.display()));
        debug!(stage = %stage, path = %package_path.display(), "resolution complete");

        Ok(ResolvedUpdate {
            version: target,
            plan,
            package_path,
        })
    }

    /// Atomically place the verified package bytes in the output
    /// directory under the full-package name for the target version.
    fn publish(
        &self,
        plan: &UpdatePlan,
        request: &ResolveRequest,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        // apply_chain rejects empty plans, so the first entry exists.
        let first = &plan.entries()[0].name;
        let final_name = ArtifactName {
            package_id: first.package_id.clone(),
            version: plan.target_version().clone(),
            kind: ArtifactKind::Full,
            channel: request.channel.clone(),
            ext: first.ext.clone(),
        }
        .to_string();
        let dest = request.output_dir.join(&final_name);
        let mut tmp = tempfile::NamedTempFile::new_in(&request.output_dir)?;
        std::io::Write::write_all(&mut tmp, bytes)?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(dest)
    }
}

fn source_err(stage: Stage, err: SourceError) -> ResolveError {
    if err.is_cancelled() {
        ResolveError::new(stage, ResolveErrorKind::Cancelled)
    } else {
        ResolveError::new(stage, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Idle < Stage::FeedFetched);
        assert!(Stage::Filtered < Stage::Planned);
        assert!(Stage::Fetching < Stage::Applying);
        assert!(Stage::Applying < Stage::Verified);
    }

    #[test]
    fn cancellation_collapses_to_one_kind() {
        let err = source_err(Stage::Fetching, SourceError::cancelled());
        assert!(err.is_cancelled());
        assert_eq!(err.stage, Stage::Fetching);

        let err = source_err(
            Stage::Idle,
            SourceError::fatal(crate::error::SourceErrorKind::FeedMissing("no feed".into())),
        );
        assert!(!err.is_cancelled());
        assert!(matches!(err.kind, ResolveErrorKind::Source(_)));
    }

    #[test]
    fn error_display_names_stage() {
        let err = ResolveError::new(Stage::Filtered, ResolveErrorKind::NothingAvailable);
        let text = err.to_string();
        assert!(text.contains("filtered"), "{text}");
    }
}
