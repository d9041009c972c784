use std::fmt;
use std::path::{Path, PathBuf};

/// A tracked signature family.
///
/// `Main` only ever receives full updates; the other three may also receive
/// incremental diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignatureFamily {
    Main,
    Daily,
    SafeBrowsing,
    Bytecode,
}

impl SignatureFamily {
    /// Every family, in processing order.
    pub const ALL: [SignatureFamily; 4] = [
        SignatureFamily::Main,
        SignatureFamily::Daily,
        SignatureFamily::SafeBrowsing,
        SignatureFamily::Bytecode,
    ];

    /// Name used in file names and URLs.
    pub fn name(self) -> &'static str {
        match self {
            SignatureFamily::Main => "main",
            SignatureFamily::Daily => "daily",
            SignatureFamily::SafeBrowsing => "safebrowsing",
            SignatureFamily::Bytecode => "bytecode",
        }
    }

    /// Whether the family is eligible for diff backfill.
    pub fn is_diffable(self) -> bool {
        !matches!(self, SignatureFamily::Main)
    }

    /// Position of this family's version in the colon-delimited record.
    pub(crate) fn record_field(self) -> usize {
        match self {
            SignatureFamily::Main => 1,
            SignatureFamily::Daily => 2,
            SignatureFamily::SafeBrowsing => 6,
            SignatureFamily::Bytecode => 7,
        }
    }

    /// `<family>.cvd`
    pub fn full_file_name(self) -> String {
        format!("{}.cvd", self.name())
    }

    /// `<family>-<sequence>.cdiff`
    pub fn diff_file_name(self, sequence: u64) -> String {
        format!("{}-{sequence}.cdiff", self.name())
    }
}

impl fmt::Display for SignatureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What kind of download an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Complete signature database at the given version.
    Full { version: u64 },
    /// Incremental diff with the given sequence number.
    Diff { sequence: u64 },
}

/// One downloadable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Artifact {
    pub family: SignatureFamily,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn full(family: SignatureFamily, version: u64) -> Self {
        Self {
            family,
            kind: ArtifactKind::Full { version },
        }
    }

    pub fn diff(family: SignatureFamily, sequence: u64) -> Self {
        Self {
            family,
            kind: ArtifactKind::Diff { sequence },
        }
    }

    /// File name, identical in the staging dir, the mirror dir and the URL.
    pub fn file_name(&self) -> String {
        match self.kind {
            ArtifactKind::Full { .. } => self.family.full_file_name(),
            ArtifactKind::Diff { sequence } => self.family.diff_file_name(sequence),
        }
    }

    /// Request path on a mirror.
    pub fn url_path(&self) -> String {
        format!("/{}", self.file_name())
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArtifactKind::Full { .. } => write!(f, "{}", self.family),
            ArtifactKind::Diff { sequence } => write!(f, "{}-{sequence}", self.family),
        }
    }
}
