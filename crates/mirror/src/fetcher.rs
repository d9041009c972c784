use crate::config::RetryPolicy;
use crate::error::Result;
use crate::family::{Artifact, ArtifactKind, SignatureFamily};
use crate::oracle::IntegrityOracle;
use crate::resolver::MirrorSet;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HOST;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Result of one walk over the mirror set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Whether some mirror produced an acceptable artifact.
    pub success: bool,
    /// Last HTTP status seen during the walk, if any.
    pub last_status: Option<u16>,
}

impl FetchOutcome {
    pub fn succeeded(status: u16) -> Self {
        Self {
            success: true,
            last_status: Some(status),
        }
    }

    pub fn failed(last_status: Option<u16>) -> Self {
        Self {
            success: false,
            last_status,
        }
    }

    /// The artifact does not exist upstream.
    pub fn is_not_found(&self) -> bool {
        !self.success && self.last_status == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

/// Downloads artifacts into the staging directory.
///
/// On success the artifact is left at `artifact.path_in(staging_dir)`.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `<family>.cvd`; only a database that verifies and embeds
    /// `expected_version` counts as success.
    async fn fetch_full(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        expected_version: u64,
    ) -> FetchOutcome;

    /// Fetch `<family>-<sequence>.cdiff`; a complete body is sufficient.
    async fn fetch_diff(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        sequence: u64,
    ) -> FetchOutcome;
}

#[async_trait]
impl<T> ArtifactFetcher for &T
where
    T: ArtifactFetcher + ?Sized,
{
    async fn fetch_full(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        expected_version: u64,
    ) -> FetchOutcome {
        (**self).fetch_full(mirrors, family, expected_version).await
    }

    async fn fetch_diff(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        sequence: u64,
    ) -> FetchOutcome {
        (**self).fetch_diff(mirrors, family, sequence).await
    }
}

/// Bytes received so far against the declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Percentage complete, when the length was declared.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some(self.received as f64 * 100.0 / total as f64),
            None => None,
        }
    }
}

enum MirrorAttempt {
    Downloaded(u16),
    Rejected(u16),
    Status(u16),
    Transport(Option<u16>),
}

/// [`ArtifactFetcher`] talking plain HTTP to each mirror address.
///
/// Requests go to the mirror's IP but carry the logical hostname in `Host`.
pub struct MirrorFetcher<O> {
    client: Client,
    hostname: String,
    port: u16,
    staging_dir: PathBuf,
    oracle: O,
}

impl<O> MirrorFetcher<O>
where
    O: IntegrityOracle,
{
    /// Create a fetcher staging into `staging_dir`.
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        staging_dir: impl Into<PathBuf>,
        oracle: O,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cvd-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, hostname, port, staging_dir, oracle))
    }

    /// Use a preconfigured reqwest client.
    pub fn with_client(
        client: Client,
        hostname: impl Into<String>,
        port: u16,
        staging_dir: impl Into<PathBuf>,
        oracle: O,
    ) -> Self {
        Self {
            client,
            hostname: hostname.into(),
            port,
            staging_dir: staging_dir.into(),
            oracle,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn url(&self, addr: Ipv4Addr, artifact: &Artifact) -> String {
        format!("http://{addr}:{}{}", self.port, artifact.url_path())
    }

    async fn fetch(&self, mirrors: &MirrorSet, artifact: Artifact) -> FetchOutcome {
        let mut last_status = None;
        for addr in mirrors.iter() {
            match self.try_mirror(*addr, &artifact).await {
                MirrorAttempt::Downloaded(status) => {
                    tracing::info!("downloaded {artifact} from {addr}");
                    return FetchOutcome::succeeded(status);
                }
                MirrorAttempt::Rejected(status) => {
                    last_status = Some(status);
                    tracing::warn!("{artifact} from {addr} failed verification");
                }
                MirrorAttempt::Status(status) => {
                    last_status = Some(status);
                    if status == StatusCode::NOT_FOUND.as_u16() {
                        tracing::warn!("{artifact} not found on {addr}");
                        return FetchOutcome::failed(last_status);
                    }
                    tracing::warn!("{artifact} from {addr} returned HTTP {status}");
                }
                MirrorAttempt::Transport(status) => {
                    if status.is_some() {
                        last_status = status;
                    }
                }
            }
            self.discard(&artifact).await;
        }
        FetchOutcome::failed(last_status)
    }

    async fn try_mirror(&self, addr: Ipv4Addr, artifact: &Artifact) -> MirrorAttempt {
        let url = self.url(addr, artifact);
        tracing::debug!("requesting {url} (Host: {})", self.hostname);

        let response = match self
            .client
            .get(&url)
            .header(HOST, self.hostname.as_str())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("request to {addr} for {artifact} failed: {err}");
                return MirrorAttempt::Transport(err.status().map(|s| s.as_u16()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return MirrorAttempt::Status(status.as_u16());
        }

        let staged = artifact.path_in(&self.staging_dir);
        if let Err(err) = stream_to_file(response, &staged).await {
            tracing::warn!("download of {artifact} from {addr} interrupted: {err}");
            return MirrorAttempt::Transport(Some(status.as_u16()));
        }

        if let ArtifactKind::Full { version } = artifact.kind {
            if !self.accept_full(artifact.family, version).await {
                return MirrorAttempt::Rejected(status.as_u16());
            }
        }
        MirrorAttempt::Downloaded(status.as_u16())
    }

    async fn accept_full(&self, family: SignatureFamily, expected: u64) -> bool {
        if !self.oracle.verify(&self.staging_dir, family).await {
            return false;
        }
        match self.oracle.local_version(&self.staging_dir, family).await {
            Some(version) if version == expected => true,
            found => {
                tracing::warn!("{family} reports version {found:?}, expected {expected}");
                false
            }
        }
    }

    async fn discard(&self, artifact: &Artifact) {
        let staged = artifact.path_in(&self.staging_dir);
        match tokio::fs::remove_file(&staged).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("failed to remove {}: {err}", staged.display()),
        }
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    path: &Path,
) -> std::result::Result<DownloadProgress, Box<dyn std::error::Error + Send + Sync>> {
    let mut progress = DownloadProgress {
        received: 0,
        total: response.content_length(),
    };
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        progress.received += chunk.len() as u64;
        match progress.percent() {
            Some(percent) => tracing::trace!(
                "downloaded {} of {} bytes ({percent:.2}%)",
                progress.received,
                progress.total.unwrap_or_default()
            ),
            None => tracing::trace!("downloaded {} bytes", progress.received),
        }
    }
    file.flush().await?;
    file.sync_all().await?;

    if let Some(total) = progress.total {
        if progress.received < total {
            return Err(format!("body ended after {} of {total} bytes", progress.received).into());
        }
    }
    tracing::debug!("wrote {} bytes to {}", progress.received, path.display());
    Ok(progress)
}

#[async_trait]
impl<O> ArtifactFetcher for MirrorFetcher<O>
where
    O: IntegrityOracle,
{
    async fn fetch_full(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        expected_version: u64,
    ) -> FetchOutcome {
        self.fetch(mirrors, Artifact::full(family, expected_version))
            .await
    }

    async fn fetch_diff(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        sequence: u64,
    ) -> FetchOutcome {
        self.fetch(mirrors, Artifact::diff(family, sequence)).await
    }
}

/// How a retried fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Fetched on the given pass (1-based).
    Fetched { pass: u32 },
    /// Upstream answered 404 on the given pass; no further passes were made.
    NotFound { pass: u32 },
    /// Every pass failed.
    Exhausted { last_status: Option<u16> },
}

/// Run `attempt` up to `policy.attempts` times, pausing between passes.
///
/// A 404 ends the loop immediately.
pub async fn fetch_with_retry<F, Fut>(
    policy: &RetryPolicy,
    artifact: &Artifact,
    mut attempt: F,
) -> RetryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchOutcome>,
{
    let mut last_status = None;
    for pass in 1..=policy.attempts {
        tracing::info!("downloading {artifact} (pass {pass})");
        let outcome = attempt().await;
        if outcome.success {
            return RetryOutcome::Fetched { pass };
        }
        if outcome.is_not_found() {
            tracing::error!("{artifact} not found, will not retry");
            return RetryOutcome::NotFound { pass };
        }
        last_status = outcome.last_status;

        if pass < policy.attempts {
            tracing::warn!(
                "download of {artifact} failed on pass {pass}, sleeping {:?}",
                policy.delay
            );
            policy.pause().await;
        }
    }
    tracing::error!("giving up on {artifact} after {} passes", policy.attempts);
    RetryOutcome::Exhausted { last_status }
}
