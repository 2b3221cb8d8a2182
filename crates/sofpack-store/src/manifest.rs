use crate::naming::ArchiveNames;
use crate::{write_atomic, StoreError};
use blake2::Blake2b512;
use sha2::{Digest, Sha512};
use sofpack_schema::{to_textproto, BuildConfig};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::info;

/// Whole-archive digests for a distribution `Manifest` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistDigests {
    pub size: u64,
    pub blake2b: String,
    pub sha512: String,
}

impl DistDigests {
    /// Hash a byte stream with BLAKE2b-512 and SHA-512 in a single pass.
    pub fn from_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut blake2b = Blake2b512::new();
        let mut sha512 = Sha512::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            blake2b.update(&buf[..n]);
            sha512.update(&buf[..n]);
            size += n as u64;
        }
        Ok(Self {
            size,
            blake2b: hex::encode(blake2b.finalize()),
            sha512: hex::encode(sha512.finalize()),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let read_err = |source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(read_err)?;
        Self::from_reader(file).map_err(read_err)
    }
}

/// Format one ebuild-style `DIST` line, newline included.
pub fn dist_line(file_name: &str, digests: &DistDigests) -> String {
    format!(
        "DIST {file_name} {} BLAKE2B {} SHA512 {}\n",
        digests.size, digests.blake2b, digests.sha512
    )
}

/// Write the enriched config as canonical text format.
pub fn write_config_snapshot(config: &BuildConfig, path: &Path) -> Result<(), StoreError> {
    let text = to_textproto(config)?;
    write_atomic(path, text.as_bytes()).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!("written reproducible config to {}", path.display());
    Ok(())
}

/// Hash `tarball` and write its `DIST` line to `manifest`.
pub fn write_dist_manifest(tarball: &Path, manifest: &Path) -> Result<DistDigests, StoreError> {
    let digests = DistDigests::from_file(tarball)?;
    let file_name = tarball
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let line = dist_line(&file_name, &digests);
    write_atomic(manifest, line.as_bytes()).map_err(|source| StoreError::Write {
        path: manifest.to_path_buf(),
        source,
    })?;
    info!("written manifest to {}", manifest.display());
    Ok(digests)
}

/// Paths and digests produced by [`write_metadata`].
#[derive(Debug, Clone)]
pub struct Sidecars {
    pub config_snapshot: PathBuf,
    pub manifest: PathBuf,
    pub digests: DistDigests,
}

/// Write both sidecars for a finished archive.
///
/// A failure here leaves the archive itself in place.
pub fn write_metadata(
    config: &BuildConfig,
    tarball: &Path,
    names: &ArchiveNames,
) -> Result<Sidecars, StoreError> {
    let config_snapshot = names.config_snapshot_path();
    write_config_snapshot(config, &config_snapshot)?;

    let manifest = names.manifest_path();
    let digests = write_dist_manifest(tarball, &manifest)?;

    Ok(Sidecars {
        config_snapshot,
        manifest,
        digests,
    })
}
