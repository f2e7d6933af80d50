use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use rollout_schema::ReleaseEntry;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::http::download_url;
use super::{UpdateSource, feed_file_name};
use crate::error::{SourceError, SourceErrorKind};
use crate::reporter::Reporter;

#[derive(Debug, Deserialize)]
struct HostedRelease {
    tag_name: String,
    draft: bool,
    prerelease: bool,
    assets: Vec<HostedAsset>,
}

#[derive(Debug, Deserialize)]
struct HostedAsset {
    name: String,
    browser_download_url: String,
}

/// Retrieves updates from a source-hosting releases API (GitHub-style).
///
/// The feed is the `releases.{channel}.txt` asset attached to the newest
/// eligible release; artifacts are assets resolved by file name across
/// all eligible releases. Whether drafts and pre-releases count is a
/// construction-time flag, not core logic.
#[derive(Debug)]
pub struct HostedReleasesSource {
    client: Client,
    api_base: String,
    owner: String,
    repo: String,
    include_prereleases: bool,
    /// file name -> download URL, remembered from the feed call.
    assets: tokio::sync::Mutex<HashMap<String, String>>,
}

impl HostedReleasesSource {
    /// Create a source for `owner/repo` on the public GitHub API.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: "https://api.github.com".to_string(),
            owner: owner.into(),
            repo: repo.into(),
            include_prereleases: false,
            assets: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Point at a different API host (enterprise installs, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Also consider pre-releases when locating the feed.
    pub fn with_prereleases(mut self, include: bool) -> Self {
        self.include_prereleases = include;
        self
    }

    /// Use a caller-configured HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn list_releases(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<HostedRelease>, SourceError> {
        let url = format!(
            "{}/repos/{}/{}/releases?per_page=50",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        );
        debug!(url, "listing releases");
        let req = self
            .client
            .get(&url)
            .header(header::USER_AGENT, crate::USER_AGENT)
            .header(header::ACCEPT, "application/vnd.github+json");
        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::cancelled()),
            r = req.send() => r?,
        };
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::fatal(SourceErrorKind::FeedMissing(format!(
                "{}/{} has no releases",
                self.owner, self.repo
            ))));
        }
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl UpdateSource for HostedReleasesSource {
    async fn release_feed(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SourceError> {
        let releases = self.list_releases(cancel).await?;
        let feed_asset_name = feed_file_name(channel);

        let mut feed_url = None;
        let mut asset_map = HashMap::new();
        // The API lists newest releases first; the first eligible release
        // carrying a feed asset wins, and earlier entries win URL conflicts.
        for release in releases
            .iter()
            .filter(|r| !r.draft && (self.include_prereleases || !r.prerelease))
        {
            for asset in &release.assets {
                if feed_url.is_none() && asset.name == feed_asset_name {
                    debug!(tag = release.tag_name, "feed asset located");
                    feed_url = Some(asset.browser_download_url.clone());
                }
                asset_map
                    .entry(asset.name.clone())
                    .or_insert_with(|| asset.browser_download_url.clone());
            }
        }

        let Some(feed_url) = feed_url else {
            return Err(SourceError::fatal(SourceErrorKind::FeedMissing(format!(
                "no '{feed_asset_name}' asset in any eligible release of {}/{}",
                self.owner, self.repo
            ))));
        };
        *self.assets.lock().await = asset_map;

        let req = self
            .client
            .get(&feed_url)
            .header(header::USER_AGENT, crate::USER_AGENT);
        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::cancelled()),
            r = req.send() => r?,
        };
        Ok(resp.error_for_status()?.text().await?)
    }

    async fn fetch(
        &self,
        entry: &ReleaseEntry,
        dest: &Path,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError> {
        let url = self
            .assets
            .lock()
            .await
            .get(&entry.file_name)
            .cloned()
            .ok_or_else(|| {
                SourceError::fatal(SourceErrorKind::ArtifactMissing(entry.file_name.clone()))
            })?;
        download_url(&self.client, &url, None, entry, dest, reporter, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use rollout_schema::{Feed, Sha1Hash};

    fn release_json(server_url: &str, body_len: usize) -> String {
        serde_json::json!([
            {
                "tag_name": "v2.0.0-rc.1",
                "draft": false,
                "prerelease": true,
                "assets": []
            },
            {
                "tag_name": "v1.0.0",
                "draft": false,
                "prerelease": false,
                "assets": [
                    {
                        "name": "releases.stable.txt",
                        "browser_download_url": format!("{server_url}/dl/releases.stable.txt"),
                        "size": 64
                    },
                    {
                        "name": "notes-1.0.0-full-stable.pkg",
                        "browser_download_url": format!("{server_url}/dl/notes-1.0.0-full-stable.pkg"),
                        "size": body_len
                    }
                ]
            }
        ])
        .to_string()
    }

    #[tokio::test]
    async fn finds_feed_asset_and_fetches_artifacts() {
        let body = b"package bytes".to_vec();
        let entry = ReleaseEntry::new(
            Sha1Hash::compute(&body),
            "notes-1.0.0-full-stable.pkg",
            body.len() as u64,
        )
        .unwrap();
        let feed_text = Feed::from_entries(vec![entry.clone()]).unwrap().encode();

        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        server
            .mock("GET", "/repos/acme/notes/releases?per_page=50")
            .with_body(release_json(&url, body.len()))
            .create_async()
            .await;
        server
            .mock("GET", "/dl/releases.stable.txt")
            .with_body(feed_text.clone())
            .create_async()
            .await;
        server
            .mock("GET", "/dl/notes-1.0.0-full-stable.pkg")
            .with_body(body.clone())
            .create_async()
            .await;

        let source = HostedReleasesSource::new("acme", "notes").with_api_base(url);
        let cancel = CancellationToken::new();
        let text = source.release_feed("stable", &cancel).await.unwrap();
        assert_eq!(text, feed_text);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(&entry.file_name);
        source
            .fetch(&entry, &dest, &NullReporter, &cancel)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn prereleases_are_skipped_unless_opted_in() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        // Only a prerelease exists, and it has no feed asset anyway.
        server
            .mock("GET", "/repos/acme/notes/releases?per_page=50")
            .with_body(
                serde_json::json!([
                    { "tag_name": "v2.0.0-rc.1", "draft": false, "prerelease": true, "assets": [] }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let source = HostedReleasesSource::new("acme", "notes").with_api_base(url);
        let err = source
            .release_feed("stable", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), SourceErrorKind::FeedMissing(_)));
    }

    #[tokio::test]
    async fn fetch_without_feed_call_is_artifact_missing() {
        let body = b"x".to_vec();
        let entry = ReleaseEntry::new(
            Sha1Hash::compute(&body),
            "notes-1.0.0-full-stable.pkg",
            1,
        )
        .unwrap();
        let source = HostedReleasesSource::new("acme", "notes");
        let dir = tempfile::tempdir().unwrap();
        let err = source
            .fetch(
                &entry,
                &dir.path().join(&entry.file_name),
                &NullReporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), SourceErrorKind::ArtifactMissing(_)));
    }
}
