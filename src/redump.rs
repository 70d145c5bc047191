//! Matching finished digests against a Redump-style reference database.
//!
//! The lookup transport is behind [`RedumpSource`]; the bundled
//! implementation reads a local dat file holding a JSON array of entries.
//! Matching itself is exact digest equality only.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::hashes::Hashes;

/// Outcome of a reference lookup.
///
/// `Error` means the lookup itself failed (store unreachable, malformed
/// data) and must never be confused with `BadDump`, which means the
/// lookup worked and the digests do not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedumpStatus {
    Unknown,
    GoodDump,
    BadDump,
    Error,
}

#[derive(Debug, Error)]
pub enum RedumpError {
    #[error("could not read reference database {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed reference database {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One known dump in the reference database. Digest fields are lowercase
/// hex; absent fields simply are not compared.
#[derive(Debug, Clone, Deserialize)]
pub struct RedumpEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub crc32: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
}

/// Lookup transport for reference records, keyed by disc id.
pub trait RedumpSource {
    fn lookup(&self, disc_id: &str) -> Result<Option<RedumpEntry>, RedumpError>;
}

/// Reference database backed by a local dat file (JSON array of entries).
pub struct DatFile {
    path: PathBuf,
}

impl DatFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl RedumpSource for DatFile {
    fn lookup(&self, disc_id: &str) -> Result<Option<RedumpEntry>, RedumpError> {
        let bytes = std::fs::read(&self.path).map_err(|source| RedumpError::Io {
            path: self.path.clone(),
            source,
        })?;
        let entries: Vec<RedumpEntry> =
            serde_json::from_slice(&bytes).map_err(|source| RedumpError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        debug!("loaded {} reference entries from {}", entries.len(), self.path.display());
        Ok(entries.into_iter().find(|e| e.id == disc_id))
    }
}

/// Result of matching the computed digests against one entry, or of the
/// lookup failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedumpResult {
    pub status: RedumpStatus,
    pub message: String,
}

impl RedumpResult {
    pub fn unknown() -> Self {
        Self {
            status: RedumpStatus::Unknown,
            message: String::new(),
        }
    }
}

/// Look up `disc_id` in `source` and compare digests.
pub fn verify_against(
    source: &dyn RedumpSource,
    disc_id: &str,
    hashes: &Hashes,
) -> RedumpResult {
    let entry = match source.lookup(disc_id) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return RedumpResult {
                status: RedumpStatus::Unknown,
                message: format!("no reference record exists for {disc_id}"),
            };
        }
        Err(err) => {
            return RedumpResult {
                status: RedumpStatus::Error,
                message: format!("reference lookup failed: {err}"),
            };
        }
    };

    match_entry(&entry, hashes)
}

/// Compare every digest present on both sides. All must match for a good
/// dump; an entry with nothing comparable is reported as a bad dump so a
/// missing digest can never pass as good.
pub fn match_entry(entry: &RedumpEntry, hashes: &Hashes) -> RedumpResult {
    let pairs = [
        ("CRC32", &entry.crc32, &hashes.crc32),
        ("MD5", &entry.md5, &hashes.md5),
        ("SHA-1", &entry.sha1, &hashes.sha1),
    ];

    let mut compared = 0usize;
    for (name, expected, actual) in pairs {
        let (Some(expected), Some(actual)) = (expected, actual) else {
            continue;
        };
        compared += 1;
        if !expected.eq_ignore_ascii_case(&hex::encode(actual)) {
            return RedumpResult {
                status: RedumpStatus::BadDump,
                message: format!(
                    "{name} does not match the known good dump of {} {} (expected {})",
                    entry.name,
                    describe_revision(&entry.revision),
                    expected.to_ascii_lowercase()
                ),
            };
        }
    }

    if compared == 0 {
        return RedumpResult {
            status: RedumpStatus::BadDump,
            message: format!(
                "the reference record for {} has no digest comparable to the calculated ones",
                entry.name
            ),
        };
    }

    RedumpResult {
        status: RedumpStatus::GoodDump,
        message: format!(
            "matches the known good dump of {} {}",
            entry.name,
            describe_revision(&entry.revision)
        ),
    }
}

fn describe_revision(revision: &str) -> String {
    if revision.is_empty() {
        "(unspecified revision)".to_string()
    } else {
        format!("(revision {revision})")
    }
}
