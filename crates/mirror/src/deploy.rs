use crate::error::{MirrorError, Result};
use nix::unistd::{chown, Gid, Group, Uid, User};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, PathPersistError};

/// File name of the published version record.
pub const MANIFEST_FILE: &str = "dns.txt";

/// Installs staged artifacts into the mirror directory.
#[derive(Debug, Clone)]
pub struct Deployer {
    mirror_dir: PathBuf,
    user: Option<String>,
    group: Option<String>,
}

impl Deployer {
    pub fn new(mirror_dir: impl Into<PathBuf>) -> Self {
        Self {
            mirror_dir: mirror_dir.into(),
            user: None,
            group: None,
        }
    }

    /// Ownership applied to deployed files, best effort.
    pub fn with_owner(mut self, user: Option<String>, group: Option<String>) -> Self {
        self.user = user;
        self.group = group;
        self
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    /// Move `staged` to `<mirror_dir>/<file_name>`.
    ///
    /// Readers of the final path see either the old or the new file. Mode is
    /// set to 0644; ownership failures are logged and ignored.
    pub fn deploy(&self, staged: &Path, file_name: &str) -> Result<PathBuf> {
        let target = self.mirror_dir.join(file_name);
        tracing::info!("deploying {file_name}");

        if let Err(err) = fs::rename(staged, &target) {
            tracing::debug!(
                "rename {} -> {} failed ({err}), copying instead",
                staged.display(),
                target.display()
            );
            let mut temp = NamedTempFile::new_in(&self.mirror_dir)?;
            let mut source = fs::File::open(staged)?;
            std::io::copy(&mut source, temp.as_file_mut())?;
            temp.as_file().sync_all()?;
            temp.into_temp_path()
                .persist(&target)
                .map_err(map_persist_error)?;
            fs::remove_file(staged)?;
        }

        self.finish(&target)?;
        tracing::info!("deployed {file_name}");
        Ok(target)
    }

    /// Write `record` to the manifest file unless it already holds it.
    ///
    /// Returns whether the file was written.
    pub fn publish_manifest(&self, record: &str) -> Result<bool> {
        let path = self.mirror_dir.join(MANIFEST_FILE);
        let current = file_digest(&path)?;
        let incoming = hex::encode(Sha256::digest(record.as_bytes()));

        if current.as_deref() == Some(incoming.as_str()) {
            tracing::info!("{MANIFEST_FILE} is current ({incoming})");
            return Ok(false);
        }

        let mut temp = NamedTempFile::new_in(&self.mirror_dir)?;
        temp.write_all(record.as_bytes())?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.into_temp_path()
            .persist(&path)
            .map_err(map_persist_error)?;
        self.finish(&path)?;
        tracing::info!("{MANIFEST_FILE} updated");
        Ok(true)
    }

    fn finish(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
        }
        self.apply_owner(path);
        Ok(())
    }

    fn apply_owner(&self, path: &Path) {
        if self.user.is_none() && self.group.is_none() {
            return;
        }
        let uid = self.user.as_deref().and_then(lookup_uid);
        let gid = self.group.as_deref().and_then(lookup_gid);
        if uid.is_none() && gid.is_none() {
            return;
        }
        if let Err(err) = chown(path, uid, gid) {
            tracing::debug!("could not change ownership of {}: {err}", path.display());
        }
    }
}

fn lookup_uid(name: &str) -> Option<Uid> {
    match User::from_name(name) {
        Ok(Some(user)) => Some(user.uid),
        Ok(None) => {
            tracing::debug!("unknown user {name}");
            None
        }
        Err(err) => {
            tracing::debug!("user lookup for {name} failed: {err}");
            None
        }
    }
}

fn lookup_gid(name: &str) -> Option<Gid> {
    match Group::from_name(name) {
        Ok(Some(group)) => Some(group.gid),
        Ok(None) => {
            tracing::debug!("unknown group {name}");
            None
        }
        Err(err) => {
            tracing::debug!("group lookup for {name} failed: {err}");
            None
        }
    }
}

/// SHA-256 of a file's content, `None` when it does not exist.
fn file_digest(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(hex::encode(Sha256::digest(&bytes)))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(MirrorError::Io(err)),
    }
}

fn map_persist_error(err: PathPersistError) -> MirrorError {
    MirrorError::Io(err.error)
}
