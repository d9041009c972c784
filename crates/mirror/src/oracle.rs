use crate::family::SignatureFamily;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Introspection of full signature databases.
///
/// Both operations look at `<dir>/<family>.cvd`.
#[async_trait]
pub trait IntegrityOracle: Send + Sync {
    /// Version embedded in the installed database, `None` when the file is
    /// missing or cannot be inspected.
    async fn local_version(&self, dir: &Path, family: SignatureFamily) -> Option<u64>;

    /// Whether the database passes structural verification.
    async fn verify(&self, dir: &Path, family: SignatureFamily) -> bool;
}

/// [`IntegrityOracle`] that runs `sigtool -i`.
#[derive(Debug, Clone)]
pub struct SigtoolOracle {
    program: OsString,
}

impl Default for SigtoolOracle {
    fn default() -> Self {
        Self {
            program: OsString::from("sigtool"),
        }
    }
}

impl SigtoolOracle {
    /// Use a specific `sigtool` binary.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn database(dir: &Path, family: SignatureFamily) -> PathBuf {
        dir.join(family.full_file_name())
    }
}

/// First `Version:` line of `sigtool -i` output.
pub(crate) fn parse_version(output: &str) -> Option<u64> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Version:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|version| version.parse().ok())
}

#[async_trait]
impl IntegrityOracle for SigtoolOracle {
    async fn local_version(&self, dir: &Path, family: SignatureFamily) -> Option<u64> {
        let path = Self::database(dir, family);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }

        let output = match Command::new(&self.program)
            .arg("-i")
            .arg(&path)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::error!("failed to run {:?} on {}: {err}", self.program, path.display());
                return None;
            }
        };

        let version = parse_version(&String::from_utf8_lossy(&output.stdout));
        if version.is_none() {
            tracing::warn!("no version reported for {}", path.display());
        }
        version
    }

    async fn verify(&self, dir: &Path, family: SignatureFamily) -> bool {
        let path = Self::database(dir, family);
        match Command::new(&self.program)
            .arg("-i")
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(err) => {
                tracing::error!("failed to run {:?} on {}: {err}", self.program, path.display());
                false
            }
        }
    }
}
