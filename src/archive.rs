//! Deterministic gzip'd tar archives of a build directory, plus checksums.
//!
//! Entries are added in lexicographic order with normalized ownership, mode
//! and mtime, and the gzip header carries no timestamp, so two equivalent
//! trees always produce byte-identical archives and therefore equal checksums.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::error::PublishError;

/// Version-control metadata that never goes into an archive.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn", ".bzr"];

/// Fixed mtime written for every entry.
const DETERMINISTIC_MTIME: u64 = 0;

/// A built archive of the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// SHA-256 of the archive bytes, lowercase hex.
    pub checksum: String,
    pub size: u64,
    /// Entity tag assigned by the object store once uploaded.
    pub etag: Option<String>,
}

/// Exclusion rules: VCS metadata plus one glob per caller-supplied pattern.
#[derive(Debug, Clone)]
pub struct Excludes {
    globs: GlobSet,
    skip_paths: Vec<PathBuf>,
}

impl Excludes {
    pub fn new(patterns: &[String]) -> Result<Self, PublishError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                PublishError::Config(format!("invalid exclude pattern `{pattern}`: {e}"))
            })?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| PublishError::Config(format!("invalid exclude patterns: {e}")))?;
        Ok(Excludes {
            globs,
            skip_paths: Vec::new(),
        })
    }

    /// Absolute paths skipped regardless of patterns (the archive being written).
    fn skipping(mut self, paths: Vec<PathBuf>) -> Self {
        self.skip_paths = paths;
        self
    }

    /// `relative` uses `/` separators and is relative to the archive root.
    pub fn is_excluded(&self, relative: &str, file_name: &str) -> bool {
        VCS_DIRS.contains(&file_name)
            || self.globs.is_match(relative)
            || self.globs.is_match(file_name)
    }
}

/// Archives `source_dir` into `target` and returns the checksummed artifact.
///
/// The archive is written to a temporary file next to `target` and renamed
/// into place once complete.
pub async fn create_archive(
    source_dir: &Path,
    target: &Path,
    patterns: &[String],
) -> Result<Artifact, PublishError> {
    let excludes = Excludes::new(patterns)?;
    let source_dir = source_dir.to_path_buf();
    let target = target.to_path_buf();

    info!(
        source = %source_dir.display(),
        target = %target.display(),
        excludes = patterns.len(),
        "[ARCHIVE] Creating archive"
    );

    let artifact = tokio::task::spawn_blocking(move || write_archive(&source_dir, &target, excludes))
        .await
        .map_err(|e| PublishError::Archive {
            path: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::Other, format!("archive task failed: {e}")),
        })??;

    info!(
        path = %artifact.path.display(),
        checksum = %artifact.checksum,
        size = artifact.size,
        "[ARCHIVE] Archive ready"
    );
    Ok(artifact)
}

fn write_archive(
    source_dir: &Path,
    target: &Path,
    excludes: Excludes,
) -> Result<Artifact, PublishError> {
    let archive_err = |source: io::Error| PublishError::Archive {
        path: target.to_path_buf(),
        source,
    };

    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(archive_err)?;

    let tmp = tempfile::NamedTempFile::new_in(&parent).map_err(archive_err)?;
    let mut skip = vec![tmp.path().canonicalize().map_err(archive_err)?];
    if let (Ok(dir), Some(name)) = (parent.canonicalize(), target.file_name()) {
        skip.push(dir.join(name));
    }
    let excludes = excludes.skipping(skip);

    let gz = GzBuilder::new().write(tmp.as_file(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.follow_symlinks(false);

    let root = source_dir.canonicalize().map_err(archive_err)?;
    append_dir(&mut builder, &root, "", &excludes).map_err(|e| {
        error!(error = ?e, source = %source_dir.display(), "[ARCHIVE] Failed to add entries");
        archive_err(e)
    })?;
    let gz = builder.into_inner().map_err(archive_err)?;
    gz.finish().map_err(archive_err)?;

    tmp.persist(target).map_err(|e| archive_err(e.error))?;

    let checksum = checksum_file(target)?;
    let size = std::fs::metadata(target).map_err(archive_err)?.len();
    Ok(Artifact {
        path: target.to_path_buf(),
        checksum,
        size,
        etag: None,
    })
}

fn append_dir<W: io::Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    prefix: &str,
    excludes: &Excludes,
) -> io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            file_name.clone()
        } else {
            format!("{prefix}/{file_name}")
        };

        if excludes.skip_paths.iter().any(|p| p == &path) {
            continue;
        }
        if excludes.is_excluded(&relative, &file_name) {
            debug!(path = %relative, "[ARCHIVE] Excluded");
            continue;
        }

        let metadata = std::fs::symlink_metadata(&path)?;
        let mut header = normalized_header(&metadata);

        if metadata.file_type().is_symlink() {
            let link_target = std::fs::read_link(&path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &relative, &link_target)?;
        } else if metadata.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, format!("{relative}/"), io::empty())?;
            append_dir(builder, &path, &relative, excludes)?;
        } else if metadata.is_file() {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(metadata.len());
            let file = File::open(&path)?;
            builder.append_data(&mut header, &relative, BufReader::new(file))?;
        }
    }
    Ok(())
}

fn normalized_header(metadata: &std::fs::Metadata) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_mode(normalized_mode(metadata));
    header.set_mtime(DETERMINISTIC_MTIME);
    header.set_uid(0);
    header.set_gid(0);
    header
}

#[cfg(unix)]
fn normalized_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.is_dir() || metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn normalized_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// SHA-256 of a file, lowercase hex (64 characters).
pub fn checksum_file(path: &Path) -> Result<String, PublishError> {
    let checksum_err = |source: io::Error| PublishError::Checksum {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(checksum_err)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(checksum_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
