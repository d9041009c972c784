//! End-to-end runs of the reconciler against in-memory collaborators.

use async_trait::async_trait;
use mirror::{
    ArtifactFetcher, DnsSource, FetchOutcome, FullUpdate, IntegrityOracle, LookupError,
    MirrorConfig, MirrorError, MirrorSet, Reconciler, RetrySettings, SignatureFamily,
    MANIFEST_FILE,
};
use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};

const RECORD: &str = "cvd:20:300:1719302400:1:90:55:12:0";

struct StaticDns {
    addrs: Vec<Ipv4Addr>,
    record: Option<String>,
}

impl StaticDns {
    fn new(record: &str) -> Self {
        Self {
            addrs: vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2)],
            record: Some(record.to_string()),
        }
    }
}

#[async_trait]
impl DnsSource for StaticDns {
    async fn ipv4_addresses(&self, _hostname: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        Ok(self.addrs.clone())
    }

    async fn txt_record(&self, _name: &str) -> Result<Option<String>, LookupError> {
        Ok(self.record.clone())
    }
}

/// Reads `VERSION <n>` databases written by [`FakeMirror`] or the fixtures.
struct ContentOracle;

#[async_trait]
impl IntegrityOracle for ContentOracle {
    async fn local_version(&self, dir: &Path, family: SignatureFamily) -> Option<u64> {
        let content = tokio::fs::read_to_string(dir.join(family.full_file_name()))
            .await
            .ok()?;
        content.strip_prefix("VERSION ")?.trim().parse().ok()
    }

    async fn verify(&self, dir: &Path, family: SignatureFamily) -> bool {
        self.local_version(dir, family).await.is_some()
    }
}

/// Upstream stand-in: serves every artifact unless told otherwise and logs
/// each fetch attempt by file name.
struct FakeMirror {
    staging: PathBuf,
    statuses: HashMap<String, u16>,
    requests: Mutex<Vec<String>>,
}

impl FakeMirror {
    fn new(staging: &Path) -> Self {
        Self {
            staging: staging.to_path_buf(),
            statuses: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, file_name: &str, status: u16) -> Self {
        self.statuses.insert(file_name.to_string(), status);
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn serve(&self, file_name: String, body: String) -> FetchOutcome {
        self.requests.lock().unwrap().push(file_name.clone());
        if let Some(status) = self.statuses.get(&file_name) {
            return FetchOutcome::failed(Some(*status));
        }
        fs::write(self.staging.join(&file_name), body).unwrap();
        FetchOutcome::succeeded(200)
    }
}

#[async_trait]
impl ArtifactFetcher for FakeMirror {
    async fn fetch_full(
        &self,
        _mirrors: &MirrorSet,
        family: SignatureFamily,
        expected_version: u64,
    ) -> FetchOutcome {
        self.serve(
            family.full_file_name(),
            format!("VERSION {expected_version}"),
        )
    }

    async fn fetch_diff(
        &self,
        _mirrors: &MirrorSet,
        family: SignatureFamily,
        sequence: u64,
    ) -> FetchOutcome {
        self.serve(family.diff_file_name(sequence), format!("diff {sequence}"))
    }
}

struct Fixture {
    _root: TempDir,
    config: MirrorConfig,
}

impl Fixture {
    fn new() -> Self {
        let root = tempdir().unwrap();
        let config = MirrorConfig {
            work_dir: root.path().join("work"),
            mirror_dir: root.path().join("mirror"),
            lock_dir: root.path().join("lock"),
            user: None,
            group: None,
            retry: RetrySettings::immediate(),
            ..MirrorConfig::default()
        };
        fs::create_dir_all(&config.work_dir).unwrap();
        fs::create_dir_all(&config.mirror_dir).unwrap();
        fs::create_dir_all(&config.lock_dir).unwrap();
        Self {
            _root: root,
            config,
        }
    }

    fn install(&self, file_name: &str, content: &str) {
        fs::write(self.config.mirror_dir.join(file_name), content).unwrap();
    }

    fn installed(&self, file_name: &str) -> Option<String> {
        fs::read_to_string(self.config.mirror_dir.join(file_name)).ok()
    }

    fn fetcher(&self) -> FakeMirror {
        FakeMirror::new(&self.config.work_dir)
    }

    fn reconciler<'a>(
        &self,
        record: &str,
        fetcher: &'a FakeMirror,
    ) -> Reconciler<StaticDns, ContentOracle, &'a FakeMirror> {
        Reconciler::new(
            self.config.clone(),
            StaticDns::new(record),
            ContentOracle,
            fetcher,
        )
    }
}

#[tokio::test]
async fn mixed_local_state_is_reconciled() {
    let fixture = Fixture::new();
    fixture.install("main.cvd", "VERSION 15");
    fixture.install("daily.cvd", "VERSION 298");
    fixture.install("bytecode.cvd", "VERSION 12");

    let fetcher = fixture.fetcher();
    let report = fixture.reconciler(RECORD, &fetcher).run().await.unwrap();

    assert_eq!(
        fetcher.requests(),
        vec![
            "main.cvd",
            "daily-299.cdiff",
            "daily-300.cdiff",
            "daily.cvd",
            "safebrowsing.cvd",
        ]
    );

    let main = report.family(SignatureFamily::Main).unwrap();
    assert_eq!(main.full, FullUpdate::Deployed { version: 20 });
    assert!(main.diffs_deployed.is_empty());

    let daily = report.family(SignatureFamily::Daily).unwrap();
    assert_eq!(daily.diffs_deployed, vec![299, 300]);
    assert_eq!(daily.full, FullUpdate::Deployed { version: 300 });

    let safebrowsing = report.family(SignatureFamily::SafeBrowsing).unwrap();
    assert_eq!(safebrowsing.local_version, None);
    assert!(safebrowsing.diffs_deployed.is_empty());
    assert_eq!(safebrowsing.full, FullUpdate::Deployed { version: 55 });

    let bytecode = report.family(SignatureFamily::Bytecode).unwrap();
    assert_eq!(bytecode.full, FullUpdate::UpToDate);

    assert_eq!(fixture.installed("main.cvd").as_deref(), Some("VERSION 20"));
    assert_eq!(fixture.installed("daily.cvd").as_deref(), Some("VERSION 300"));
    assert_eq!(fixture.installed("daily-299.cdiff").as_deref(), Some("diff 299"));
    assert_eq!(fixture.installed("daily-300.cdiff").as_deref(), Some("diff 300"));
    assert_eq!(fixture.installed("safebrowsing.cvd").as_deref(), Some("VERSION 55"));
    assert_eq!(fixture.installed(MANIFEST_FILE).as_deref(), Some(RECORD));
    assert!(report.manifest_published);
    assert_eq!(report.mirrors.len(), 2);
}

#[tokio::test]
async fn up_to_date_mirror_is_left_alone() {
    let fixture = Fixture::new();
    fixture.install("main.cvd", "VERSION 20");
    fixture.install("daily.cvd", "VERSION 300");
    fixture.install("safebrowsing.cvd", "VERSION 55");
    fixture.install("bytecode.cvd", "VERSION 12");

    let fetcher = fixture.fetcher();
    let first = fixture.reconciler(RECORD, &fetcher).run().await.unwrap();
    assert!(first.manifest_published);

    let second = fixture.reconciler(RECORD, &fetcher).run().await.unwrap();
    assert!(!second.manifest_published);
    assert!(fetcher.requests().is_empty());
    assert!(second
        .families
        .iter()
        .all(|family| family.full == FullUpdate::UpToDate && family.diffs_deployed.is_empty()));
}

#[tokio::test]
async fn missing_diffs_are_backfilled_in_order() {
    let fixture = Fixture::new();
    fixture.install("main.cvd", "VERSION 20");
    fixture.install("daily.cvd", "VERSION 300");
    fixture.install("safebrowsing.cvd", "VERSION 55");
    fixture.install("bytecode.cvd", "VERSION 3");

    let fetcher = fixture.fetcher();
    let record = "cvd:20:300:1719302400:1:90:55:6";
    let report = fixture.reconciler(record, &fetcher).run().await.unwrap();

    assert_eq!(
        fetcher.requests(),
        vec![
            "bytecode-4.cdiff",
            "bytecode-5.cdiff",
            "bytecode-6.cdiff",
            "bytecode.cvd"
        ]
    );
    let bytecode = report.family(SignatureFamily::Bytecode).unwrap();
    assert_eq!(bytecode.diffs_deployed, vec![4, 5, 6]);
}

#[tokio::test]
async fn diffs_already_mirrored_are_skipped() {
    let fixture = Fixture::new();
    fixture.install("main.cvd", "VERSION 20");
    fixture.install("daily.cvd", "VERSION 297");
    fixture.install("daily-299.cdiff", "diff 299");
    fixture.install("safebrowsing.cvd", "VERSION 55");
    fixture.install("bytecode.cvd", "VERSION 12");

    let fetcher = fixture.fetcher();
    let report = fixture.reconciler(RECORD, &fetcher).run().await.unwrap();

    assert_eq!(
        fetcher.requests(),
        vec!["daily-298.cdiff", "daily-300.cdiff", "daily.cvd"]
    );
    let daily = report.family(SignatureFamily::Daily).unwrap();
    assert_eq!(daily.diffs_deployed, vec![298, 300]);
}

#[tokio::test]
async fn not_found_is_not_retried_and_run_continues() {
    let fixture = Fixture::new();
    fixture.install("main.cvd", "VERSION 15");
    fixture.install("daily.cvd", "VERSION 298");
    fixture.install("safebrowsing.cvd", "VERSION 55");
    fixture.install("bytecode.cvd", "VERSION 12");

    let fetcher = fixture
        .fetcher()
        .failing("main.cvd", 404)
        .failing("daily-299.cdiff", 404);
    let report = fixture.reconciler(RECORD, &fetcher).run().await.unwrap();

    assert_eq!(
        fetcher.requests(),
        vec!["main.cvd", "daily-299.cdiff", "daily-300.cdiff", "daily.cvd"]
    );
    assert_eq!(
        report.family(SignatureFamily::Main).unwrap().full,
        FullUpdate::NotFound
    );
    let daily = report.family(SignatureFamily::Daily).unwrap();
    assert_eq!(daily.diffs_failed, vec![299]);
    assert_eq!(daily.diffs_deployed, vec![300]);
    assert_eq!(fixture.installed("main.cvd").as_deref(), Some("VERSION 15"));
}

#[tokio::test]
async fn persistent_failure_exhausts_retries_without_aborting() {
    let fixture = Fixture::new();
    fixture.install("daily.cvd", "VERSION 300");
    fixture.install("safebrowsing.cvd", "VERSION 55");
    fixture.install("bytecode.cvd", "VERSION 12");

    let fetcher = fixture.fetcher().failing("main.cvd", 503);
    let report = fixture.reconciler(RECORD, &fetcher).run().await.unwrap();

    assert_eq!(fetcher.requests(), vec!["main.cvd"; 5]);
    assert_eq!(
        report.family(SignatureFamily::Main).unwrap().full,
        FullUpdate::Exhausted {
            last_status: Some(503)
        }
    );
    assert_eq!(fixture.installed("main.cvd"), None);
    assert!(report.manifest_published);
}

#[tokio::test]
async fn unresolvable_hostname_aborts_before_any_fetch() {
    let fixture = Fixture::new();
    let fetcher = fixture.fetcher();
    let dns = StaticDns {
        addrs: Vec::new(),
        record: Some(RECORD.to_string()),
    };
    let reconciler = Reconciler::new(fixture.config.clone(), dns, ContentOracle, &fetcher);

    let err = reconciler.run().await.unwrap_err();
    assert!(matches!(err, MirrorError::MirrorResolution { attempts: 5, .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(fetcher.requests().is_empty());
    assert_eq!(fixture.installed(MANIFEST_FILE), None);
}

#[tokio::test]
async fn missing_record_aborts_with_its_own_status() {
    let fixture = Fixture::new();
    let fetcher = fixture.fetcher();
    let dns = StaticDns {
        addrs: vec![Ipv4Addr::LOCALHOST],
        record: None,
    };
    let reconciler = Reconciler::new(fixture.config.clone(), dns, ContentOracle, &fetcher);

    let err = reconciler.run().await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn malformed_record_fails_loudly() {
    let fixture = Fixture::new();
    let fetcher = fixture.fetcher();

    let err = fixture
        .reconciler("cvd:20:300", &fetcher)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::MalformedRecord { .. }));
    assert!(fetcher.requests().is_empty());
    assert_eq!(fixture.installed(MANIFEST_FILE), None);
}

#[tokio::test]
async fn held_lock_prevents_any_work() {
    let fixture = Fixture::new();
    let _held = mirror::InstanceLock::acquire(&fixture.config.lock_dir, &fixture.config.lock_name)
        .unwrap();

    let err = mirror::run(&fixture.config).await.unwrap_err();

    assert!(matches!(err, MirrorError::LockHeld(_)));
    assert_eq!(err.exit_code(), 254);
    assert_eq!(fs::read_dir(&fixture.config.work_dir).unwrap().count(), 0);
    assert_eq!(fs::read_dir(&fixture.config.mirror_dir).unwrap().count(), 0);
}
