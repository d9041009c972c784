//! DNS-coordinated signature mirror.
//!
//! This crate keeps a local mirror of a versioned signature feed in sync with
//! an upstream distribution network. Mirror addresses come from an A-record
//! lookup and the current versions from a colon-delimited TXT record; full
//! databases and incremental diffs are then fetched over plain HTTP with
//! per-mirror failover, verified, and moved into the mirror directory.
//!
//! ```ignore
//! use mirror::{run, MirrorConfig};
//!
//! # async fn demo() -> mirror::Result<()> {
//! let config = MirrorConfig {
//!     mirror_dir: "/srv/mirror".into(),
//!     ..MirrorConfig::default()
//! };
//! let report = run(&config).await?;
//! for family in &report.families {
//!     println!("{}: {:?}", family.family, family.full);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod deploy;
mod dns;
mod error;
mod family;
mod feed;
mod fetcher;
mod lock;
mod manifest;
mod oracle;
mod reconcile;
mod resolver;

pub use config::{MirrorConfig, RetryPolicy, RetrySettings};
pub use deploy::{Deployer, MANIFEST_FILE};
pub use dns::{DnsSource, HickoryDns, LookupError};
pub use error::{MirrorError, Result};
pub use family::{Artifact, ArtifactKind, SignatureFamily};
pub use feed::read_version_record;
pub use fetcher::{
    fetch_with_retry, ArtifactFetcher, DownloadProgress, FetchOutcome, MirrorFetcher,
    RetryOutcome,
};
pub use lock::InstanceLock;
pub use manifest::VersionManifest;
pub use oracle::{IntegrityOracle, SigtoolOracle};
pub use reconcile::{FamilyReport, FullUpdate, Reconciler, RunReport};
pub use resolver::{resolve_mirrors, MirrorSet};

/// Run one update with the production collaborators.
///
/// The instance lock is taken before anything else touches the network or
/// the filesystem, and released when the run ends.
pub async fn run(config: &MirrorConfig) -> Result<RunReport> {
    let _lock = InstanceLock::acquire(&config.lock_dir, &config.lock_name)?;

    let oracle = SigtoolOracle::default();
    let fetcher = MirrorFetcher::new(
        config.hostname.as_str(),
        config.http_port,
        config.work_dir.as_path(),
        oracle.clone(),
    )?;
    let reconciler = Reconciler::new(config.clone(), HickoryDns::from_system(), oracle, fetcher);
    reconciler.run().await
}
