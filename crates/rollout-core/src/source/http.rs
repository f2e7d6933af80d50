use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, header};
use rollout_schema::ReleaseEntry;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{UpdateSource, feed_file_name, part_path, verify_length};
use crate::error::{SourceError, SourceErrorKind};
use crate::reporter::Reporter;
use crate::signing::RequestSigner;

/// Retrieves updates over HTTP(S) from a base URL.
///
/// The feed lives at the fixed relative path `releases.{channel}.txt`;
/// artifacts are resolved by file name against the same base. Downloads
/// resume from a leftover `.part` file via a byte-range request when the
/// server honors ranges. An optional [`RequestSigner`] is applied
/// uniformly to every outbound request.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    base_url: String,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl HttpSource {
    /// Create a source over `base_url` with a default client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            signer: None,
        }
    }

    /// Use a caller-configured HTTP client (proxies, timeouts).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Sign every outbound request with `signer`.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("base_url", &self.base_url)
            .field("signed", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UpdateSource for HttpSource {
    async fn release_feed(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SourceError> {
        let url = self.url_for(&feed_file_name(channel));
        debug!(url, "fetching feed");
        let mut req = self
            .client
            .get(&url)
            .header(header::USER_AGENT, crate::USER_AGENT);
        if let Some(signer) = &self.signer {
            let (name, value) = signer.sign("GET", &url, &[]);
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(SourceError::cancelled()),
            r = req.send() => r?,
        };
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::fatal(SourceErrorKind::FeedMissing(url)));
        }
        let resp = resp.error_for_status()?;
        Ok(resp.text().await?)
    }

    async fn fetch(
        &self,
        entry: &ReleaseEntry,
        dest: &Path,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError> {
        let url = self.url_for(&entry.file_name);
        download_url(
            &self.client,
            &url,
            self.signer.as_deref(),
            entry,
            dest,
            reporter,
            cancel,
        )
        .await
    }
}

/// Streaming artifact download shared by the HTTP and hosted-releases
/// sources.
///
/// Resumes from an existing `.part` file where the server honors ranges,
/// verifies the final byte count against the entry, and renames the part
/// file into place only on success. On cancellation the part file is
/// removed; on transient network failure it is kept for a later resume.
pub(crate) async fn download_url(
    client: &Client,
    url: &str,
    signer: Option<&dyn RequestSigner>,
    entry: &ReleaseEntry,
    dest: &Path,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<(), SourceError> {
    let part = part_path(dest);
    let mut offset = match tokio::fs::metadata(&part).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if offset >= entry.file_size {
        // A stale or oversized part file is not trustworthy.
        tokio::fs::remove_file(&part).await.ok();
        offset = 0;
    }

    let mut req = client.get(url).header(header::USER_AGENT, crate::USER_AGENT);
    if offset > 0 {
        req = req.header(header::RANGE, format!("bytes={offset}-"));
    }
    if let Some(signer) = signer {
        let (name, value) = signer.sign("GET", url, &[]);
        req = req.header(name.as_str(), value.as_str());
    }

    let resp = tokio::select! {
        () = cancel.cancelled() => return Err(SourceError::cancelled()),
        r = req.send() => r?,
    };
    if resp.status() == StatusCode::NOT_FOUND {
        return Err(SourceError::fatal(SourceErrorKind::ArtifactMissing(
            entry.file_name.clone(),
        )));
    }
    let resp = resp.error_for_status()?;

    let resumed = offset > 0 && resp.status() == StatusCode::PARTIAL_CONTENT;
    let mut file = if resumed {
        debug!(url, offset, "resuming download");
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&part)
            .await?
    } else {
        offset = 0;
        tokio::fs::File::create(&part).await?
    };

    let mut written = offset;
    let mut last_pct = progress_pct(written, entry.file_size);
    reporter.fetching(entry, last_pct);

    let mut stream = resp.bytes_stream();
    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                drop(file);
                tokio::fs::remove_file(&part).await.ok();
                return Err(SourceError::cancelled());
            }
            c = stream.next() => match c {
                Some(c) => c?, // part file kept for resume on network error
                None => break,
            },
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        let pct = progress_pct(written, entry.file_size);
        if pct > last_pct {
            last_pct = pct;
            reporter.fetching(entry, pct);
        }
    }
    file.flush().await?;
    drop(file);

    if let Err(e) = verify_length(entry, written) {
        tokio::fs::remove_file(&part).await.ok();
        return Err(e);
    }
    tokio::fs::rename(&part, dest).await?;
    reporter.fetching(entry, 100);
    Ok(())
}

fn progress_pct(written: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((written.saturating_mul(100) / total).min(100)) as u8
}
