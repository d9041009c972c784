use crate::config::MirrorConfig;
use crate::deploy::{Deployer, MANIFEST_FILE};
use crate::dns::DnsSource;
use crate::error::Result;
use crate::family::{Artifact, SignatureFamily};
use crate::feed::read_version_record;
use crate::fetcher::{fetch_with_retry, ArtifactFetcher, RetryOutcome};
use crate::manifest::VersionManifest;
use crate::oracle::IntegrityOracle;
use crate::resolver::{resolve_mirrors, MirrorSet};

/// What happened to a family's full database during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullUpdate {
    /// Local version already at or past the remote one.
    UpToDate,
    /// A new database was downloaded and deployed.
    Deployed { version: u64 },
    /// Upstream answered 404.
    NotFound,
    /// Every retry pass failed.
    Exhausted { last_status: Option<u16> },
    /// Downloaded, but installing it into the mirror failed.
    DeployFailed,
}

/// Per-family result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyReport {
    pub family: SignatureFamily,
    pub local_version: Option<u64>,
    pub remote_version: u64,
    /// Diff sequence numbers deployed, ascending.
    pub diffs_deployed: Vec<u64>,
    /// Diff sequence numbers that could not be fetched or deployed.
    pub diffs_failed: Vec<u64>,
    pub full: FullUpdate,
}

/// Everything a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mirrors: MirrorSet,
    pub manifest: VersionManifest,
    pub families: Vec<FamilyReport>,
    /// Whether the manifest file was rewritten.
    pub manifest_published: bool,
}

impl RunReport {
    pub fn family(&self, family: SignatureFamily) -> Option<&FamilyReport> {
        self.families.iter().find(|report| report.family == family)
    }
}

/// Drives one mirror run: discovery, per-family reconciliation, publication.
///
/// The fetcher must stage into `config.work_dir`.
pub struct Reconciler<D, O, F> {
    config: MirrorConfig,
    dns: D,
    oracle: O,
    fetcher: F,
    deployer: Deployer,
}

impl<D, O, F> Reconciler<D, O, F>
where
    D: DnsSource,
    O: IntegrityOracle,
    F: ArtifactFetcher,
{
    pub fn new(config: MirrorConfig, dns: D, oracle: O, fetcher: F) -> Self {
        let deployer = Deployer::new(config.mirror_dir.clone())
            .with_owner(config.user.clone(), config.group.clone());
        Self {
            config,
            dns,
            oracle,
            fetcher,
            deployer,
        }
    }

    /// Execute a full run.
    ///
    /// Only mirror resolution, the record query, a malformed record and
    /// manifest publication can fail the run; per-artifact failures end up in
    /// the report.
    pub async fn run(&self) -> Result<RunReport> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        tokio::fs::create_dir_all(&self.config.mirror_dir).await?;

        let mirrors =
            resolve_mirrors(&self.dns, &self.config.hostname, &self.config.retry.resolve).await?;
        let record =
            read_version_record(&self.dns, &self.config.txt_record, &self.config.retry.record)
                .await?;
        let manifest = VersionManifest::parse(&record)?;

        let mut families = Vec::with_capacity(SignatureFamily::ALL.len());
        for family in SignatureFamily::ALL {
            families.push(self.reconcile_family(&mirrors, &manifest, family).await);
        }

        tracing::info!("updating {MANIFEST_FILE}");
        let manifest_published = self.deployer.publish_manifest(&record)?;

        Ok(RunReport {
            mirrors,
            manifest,
            families,
            manifest_published,
        })
    }

    async fn reconcile_family(
        &self,
        mirrors: &MirrorSet,
        manifest: &VersionManifest,
        family: SignatureFamily,
    ) -> FamilyReport {
        let remote = manifest.version(family);
        let local = self
            .oracle
            .local_version(&self.config.mirror_dir, family)
            .await;
        tracing::info!("checking {family}: local {local:?}, remote {remote}");

        let mut report = FamilyReport {
            family,
            local_version: local,
            remote_version: remote,
            diffs_deployed: Vec::new(),
            diffs_failed: Vec::new(),
            full: FullUpdate::UpToDate,
        };

        if let Some(local) = local.filter(|_| family.is_diffable()) {
            for sequence in local.saturating_add(1)..=remote {
                if self.is_mirrored(&Artifact::diff(family, sequence)).await {
                    continue;
                }
                if self.update_diff(mirrors, family, sequence).await {
                    report.diffs_deployed.push(sequence);
                } else {
                    report.diffs_failed.push(sequence);
                }
            }
        }

        match local {
            Some(local) if local >= remote => {
                tracing::info!("no update required for {family}: local {local} => remote {remote}");
            }
            _ => {
                tracing::info!("update required for {family}: local {local:?} => remote {remote}");
                report.full = self.update_full(mirrors, family, remote).await;
            }
        }
        report
    }

    async fn is_mirrored(&self, artifact: &Artifact) -> bool {
        tokio::fs::try_exists(artifact.path_in(&self.config.mirror_dir))
            .await
            .unwrap_or(false)
    }

    async fn update_diff(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        sequence: u64,
    ) -> bool {
        let artifact = Artifact::diff(family, sequence);
        let outcome = fetch_with_retry(&self.config.retry.diff_fetch, &artifact, || {
            self.fetcher.fetch_diff(mirrors, family, sequence)
        })
        .await;

        match outcome {
            RetryOutcome::Fetched { .. } => self.install(&artifact),
            RetryOutcome::NotFound { .. } | RetryOutcome::Exhausted { .. } => false,
        }
    }

    async fn update_full(
        &self,
        mirrors: &MirrorSet,
        family: SignatureFamily,
        version: u64,
    ) -> FullUpdate {
        let artifact = Artifact::full(family, version);
        let outcome = fetch_with_retry(&self.config.retry.full_fetch, &artifact, || {
            self.fetcher.fetch_full(mirrors, family, version)
        })
        .await;

        match outcome {
            RetryOutcome::Fetched { .. } => {
                if self.install(&artifact) {
                    FullUpdate::Deployed { version }
                } else {
                    FullUpdate::DeployFailed
                }
            }
            RetryOutcome::NotFound { .. } => FullUpdate::NotFound,
            RetryOutcome::Exhausted { last_status } => FullUpdate::Exhausted { last_status },
        }
    }

    fn install(&self, artifact: &Artifact) -> bool {
        let staged = artifact.path_in(&self.config.work_dir);
        match self.deployer.deploy(&staged, &artifact.file_name()) {
            Ok(_) => true,
            Err(err) => {
                tracing::error!("deploying {artifact} failed: {err}");
                false
            }
        }
    }
}
