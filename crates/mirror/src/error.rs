use std::path::PathBuf;

/// Convenient result alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can abort a mirror run.
///
/// Per-artifact failures (a dead mirror, a stale download, a 404) never
/// surface here; they are absorbed by the fetch retry loops and reported in
/// the run report instead.
#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    /// The mirror hostname did not resolve to any address.
    #[error("resolving hostname {hostname} failed after {attempts} tries")]
    MirrorResolution {
        /// Hostname that was queried.
        hostname: String,
        /// Number of lookups performed.
        attempts: u32,
    },
    /// The version TXT record could not be retrieved.
    #[error("TXT record query for {name} failed after {attempts} tries")]
    RecordQuery {
        /// Record name that was queried.
        name: String,
        /// Number of lookups performed.
        attempts: u32,
    },
    /// The version record did not have the expected shape.
    #[error("malformed version record {record:?}: {reason}")]
    MalformedRecord {
        /// Raw record as received.
        record: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Another instance already holds the lock file.
    #[error("another instance is already running (lock held on {0})")]
    LockHeld(PathBuf),
    /// The lock file could not be opened or locked.
    #[error("failed to lock {path}: {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MirrorError::MirrorResolution { .. } => 2,
            MirrorError::RecordQuery { .. } => 3,
            MirrorError::LockHeld(_) => 254,
            _ => 1,
        }
    }

    /// Helper for wrapping record validation failures.
    pub fn malformed(record: &str, reason: impl Into<String>) -> Self {
        MirrorError::MalformedRecord {
            record: record.to_string(),
            reason: reason.into(),
        }
    }
}
