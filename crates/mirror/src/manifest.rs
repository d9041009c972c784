use crate::error::{MirrorError, Result};
use crate::family::SignatureFamily;
use std::str::FromStr;

/// Remote versions for every tracked family, parsed from the TXT record.
///
/// The record is colon-delimited with fixed positions; anything shorter than
/// the bytecode field or carrying a non-numeric version is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionManifest {
    raw: String,
    pub main: u64,
    pub daily: u64,
    pub safebrowsing: u64,
    pub bytecode: u64,
}

impl VersionManifest {
    /// Parse the raw record.
    pub fn parse(record: &str) -> Result<Self> {
        let raw = record.trim();
        let fields: Vec<&str> = raw.split(':').collect();
        let needed = SignatureFamily::Bytecode.record_field() + 1;
        if fields.len() < needed {
            return Err(MirrorError::malformed(
                raw,
                format!("expected at least {needed} fields, found {}", fields.len()),
            ));
        }

        let version = |family: SignatureFamily| -> Result<u64> {
            let field = fields[family.record_field()].trim();
            field.parse::<u64>().map_err(|_| {
                MirrorError::malformed(raw, format!("{family} version {field:?} is not a number"))
            })
        };

        Ok(Self {
            main: version(SignatureFamily::Main)?,
            daily: version(SignatureFamily::Daily)?,
            safebrowsing: version(SignatureFamily::SafeBrowsing)?,
            bytecode: version(SignatureFamily::Bytecode)?,
            raw: raw.to_string(),
        })
    }

    /// Remote version for `family`.
    pub fn version(&self, family: SignatureFamily) -> u64 {
        match family {
            SignatureFamily::Main => self.main,
            SignatureFamily::Daily => self.daily,
            SignatureFamily::SafeBrowsing => self.safebrowsing,
            SignatureFamily::Bytecode => self.bytecode,
        }
    }

    /// The record exactly as published (whitespace-trimmed).
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionManifest {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
