use crate::digest::{ensure_dir, verify_digest, HashingReader};
use crate::naming::ArchiveNames;
use crate::{fsync_dir, join_within, parent_dir, StoreError};
use flate2::write::GzEncoder;
use flate2::Compression;
use sofpack_schema::BuildConfig;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Pack every declared artifact into `<stem>.tar.gz`.
///
/// Artifacts are written in declared order with fixed ownership, mode and
/// timestamps, so identical inputs give a byte-identical archive. Each
/// artifact's SHA-256 is computed while its bytes stream into the archive,
/// checked against any declared digest, and written back into the config.
///
/// The archive is assembled in a temp file next to its final path and only
/// renamed into place once the tar stream, the gzip stream and the file have
/// all been closed. A checksum mismatch therefore leaves no archive behind.
pub fn package_tarball(
    config: &mut BuildConfig,
    tree: &Path,
    names: &ArchiveNames,
) -> Result<PathBuf, StoreError> {
    ensure_dir(names.out_dir())?;

    let tar_path = names.tarball_path();
    let dir = parent_dir(&tar_path);
    let tmp = NamedTempFile::new_in(&dir)?;
    let gz = GzEncoder::new(tmp, Compression::default());
    let mut ar = tar::Builder::new(gz);
    let flat = config.flat_tarball;

    for artifact in &mut config.artifact {
        let src = join_within(tree, &artifact.built_path)?;
        let file = File::open(&src).map_err(|source| StoreError::Read {
            path: src.clone(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| StoreError::Read {
                path: src.clone(),
                source,
            })?
            .len();

        if artifact.name.is_empty() {
            artifact.name = artifact.display_name();
        }
        let entry_name = names.entry_name(&artifact.name, flat);

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        let mut reader = HashingReader::new(BufReader::new(file).take(size));
        ar.append_data(&mut header, &entry_name, &mut reader)?;
        let (digest, streamed) = reader.finish();
        if streamed != size {
            return Err(StoreError::ShortRead {
                path: src,
                expected: size,
                actual: streamed,
            });
        }

        verify_digest(&artifact.built_path, &artifact.sha256, &digest)?;
        debug!("packed {entry_name} ({size} bytes, sha256 {digest})");
        artifact.sha256 = digest.into_inner();
    }

    // Close order matters: tar trailer, then gzip trailer, then the file.
    let gz = ar.into_inner()?;
    let tmp = gz.finish()?;
    tmp.as_file().sync_all()?;
    tmp.persist(&tar_path).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(&dir)?;

    info!("written tarball to {}", tar_path.display());
    Ok(tar_path)
}
