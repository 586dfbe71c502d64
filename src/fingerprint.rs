//! Checks that static assets carry a content hash in their file name, so a
//! published asset can be cached forever without going stale.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::error::PublishError;

/// An optional name segment, a run of 20 to 124 hex characters, then one or
/// more extensions: `app.a1b2c3d4e5f6a7b8c9d0.js`, `0123...cdef.css.map`.
const FINGERPRINT_PATTERN: &str = r"^(?:.*[._-])?[0-9a-fA-F]{20,124}(?:\.[A-Za-z0-9]+)+$";

fn fingerprint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FINGERPRINT_PATTERN).expect("fingerprint pattern is valid"))
}

pub fn is_fingerprinted(file_name: &str) -> bool {
    fingerprint_regex().is_match(file_name)
}

/// Walks `dir` recursively and returns the relative paths of every file,
/// except `manifest`, whose name is not fingerprinted. Sorted.
pub fn unfingerprinted_files(dir: &Path, manifest: &str) -> Result<Vec<String>, PublishError> {
    let mut offenders = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            PublishError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == manifest || is_fingerprinted(&name) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        offenders.push(relative);
    }
    Ok(offenders)
}

/// Fails with [`PublishError::Fingerprint`] naming every offending file.
pub fn verify_fingerprints(dir: &Path, manifest: &str) -> Result<(), PublishError> {
    info!(dir = %dir.display(), manifest, "[FINGERPRINT] Verifying asset names");
    let offenders = unfingerprinted_files(dir, manifest)?;
    if offenders.is_empty() {
        info!(dir = %dir.display(), "[FINGERPRINT] All assets are fingerprinted");
        return Ok(());
    }
    for file in &offenders {
        error!(file = %file, "[FINGERPRINT] Asset name has no content hash");
    }
    Err(PublishError::Fingerprint { files: offenders })
}
