//! Signature mirror updater.
//!
//! Meant to be run periodically from a scheduler; concurrent invocations are
//! refused through the lock file.

use clap::Parser;
use mirror::{FullUpdate, MirrorConfig, RunReport};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

/// Command-line arguments for the mirror updater
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Signature source server hostname
    #[arg(short = 'a', long, default_value = "database.clamav.net")]
    hostname: String,

    /// TXT record carrying the current versions
    #[arg(short = 'r', long = "text-record", default_value = "current.cvd.clamav.net")]
    txt_record: String,

    /// Working directory for staged downloads
    #[arg(short = 'w', long = "work-directory", default_value = "/var/spool/clamav-mirror")]
    work_dir: PathBuf,

    /// The mirror directory
    #[arg(
        short = 'd',
        long = "mirror-directory",
        default_value = "/srv/www/datafeeds.baruwa.com/clamav"
    )]
    mirror_dir: PathBuf,

    /// Change file owner to this user
    #[arg(short, long, default_value = "nginx")]
    user: String,

    /// Change file group to this group
    #[arg(short, long, default_value = "nginx")]
    group: String,

    /// Lock files directory
    #[arg(short = 'l', long = "locks-directory", default_value = "/var/lock/subsys")]
    lock_dir: PathBuf,

    /// Port mirrors are contacted on
    #[arg(long, default_value_t = 80)]
    http_port: u16,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> MirrorConfig {
        MirrorConfig {
            hostname: self.hostname,
            txt_record: self.txt_record,
            work_dir: self.work_dir,
            mirror_dir: self.mirror_dir,
            user: non_empty(self.user),
            group: non_empty(self.group),
            lock_dir: self.lock_dir,
            http_port: self.http_port,
            ..MirrorConfig::default()
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --debug when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.debug {
            EnvFilter::new("debug,mirror=debug")
        } else {
            EnvFilter::new("info,mirror=info")
        }
    });
    fmt().with_env_filter(filter).init();

    let config = args.into_config();
    match mirror::run(&config).await {
        Ok(report) => {
            summarize(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn summarize(report: &RunReport) {
    for family in &report.families {
        let full = match family.full {
            FullUpdate::UpToDate => "up to date".to_string(),
            FullUpdate::Deployed { version } => format!("deployed version {version}"),
            FullUpdate::NotFound => "not found upstream".to_string(),
            FullUpdate::Exhausted { last_status } => match last_status {
                Some(status) => format!("gave up (last HTTP status {status})"),
                None => "gave up".to_string(),
            },
            FullUpdate::DeployFailed => "deploy failed".to_string(),
        };
        tracing::info!(
            "{}: {full}; {} diff(s) deployed, {} failed",
            family.family,
            family.diffs_deployed.len(),
            family.diffs_failed.len()
        );
    }
    if report.manifest_published {
        tracing::info!("{} updated", mirror::MANIFEST_FILE);
    }
}
