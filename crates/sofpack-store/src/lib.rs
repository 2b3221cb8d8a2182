//! Checksumming, archive packaging, and manifest output for sofpack.
//!
//! This crate owns everything that touches output bytes: streaming SHA-256
//! digests and blob copies (`digest`), archive naming (`naming`), the
//! deterministic tar+gzip packager that verifies artifact checksums
//! (`tarball`), and the sidecar writers for the canonical config snapshot and
//! the `DIST` manifest line (`manifest`).

pub mod digest;
pub mod manifest;
pub mod naming;
pub mod tarball;

pub use digest::{copy_file, ensure_dir, sha256_file, sha256_reader, verify_digest, HashingReader};
pub use manifest::{
    dist_line, write_config_snapshot, write_dist_manifest, write_metadata, DistDigests, Sidecars,
};
pub use naming::ArchiveNames;
pub use tarball::package_tarball;

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Directory that holds `path`, with `.` standing in for a bare file name.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Join a config-supplied relative path onto `base`, refusing anything that
/// would resolve outside it (absolute paths, drive prefixes, `..`).
pub fn join_within(base: &Path, rel: &str) -> Result<PathBuf, StoreError> {
    let rel_path = Path::new(rel);
    let escapes = rel.starts_with('\\')
        || rel_path.components().any(|c| {
            matches!(
                c,
                Component::RootDir | Component::Prefix(_) | Component::ParentDir
            )
        });
    if escapes {
        return Err(StoreError::OutsideBase {
            base: base.to_path_buf(),
            path: rel.to_owned(),
        });
    }
    Ok(base.join(rel_path))
}

/// Write `content` to `dest` through a temp file in the same directory.
pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    let dir = parent_dir(dest);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    fsync_dir(&dir)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("mismatched checksum of {subject}: got {actual}, want {expected}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },
    #[error("failed to copy {} to {}: {source}", .src.display(), .dst.display())]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} changed while packaging: header declares {expected} bytes, streamed {actual}", .path.display())]
    ShortRead {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("'{path}' resolves outside {}", .base.display())]
    OutsideBase { base: PathBuf, path: String },
    #[error("cannot encode config snapshot: {0}")]
    Snapshot(#[from] sofpack_schema::TextprotoError),
    #[error("error writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// True for digest commitment failures, as opposed to I/O problems.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}
