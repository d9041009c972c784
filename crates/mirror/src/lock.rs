use crate::error::{MirrorError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock held for the lifetime of a run.
///
/// Released when dropped (or when the process exits).
pub struct InstanceLock {
    path: PathBuf,
    _guard: Flock<File>,
}

impl InstanceLock {
    /// Lock `<lock_dir>/<name>` without blocking.
    pub fn acquire(lock_dir: &Path, name: &str) -> Result<Self> {
        let path = lock_dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| MirrorError::Lock {
                path: path.clone(),
                source,
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(guard) => {
                tracing::debug!("acquired lock {}", path.display());
                Ok(Self {
                    path,
                    _guard: guard,
                })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(MirrorError::LockHeld(path)),
            Err((_, errno)) => Err(MirrorError::Lock {
                path,
                source: std::io::Error::from(errno),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLock")
            .field("path", &self.path)
            .finish()
    }
}
