use crate::StoreError;
use sha2::{Digest, Sha256};
use sofpack_schema::Sha256Hex;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Reader adapter that hashes and counts every byte passing through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Consume the reader, returning the digest and the number of bytes seen.
    pub fn finish(self) -> (Sha256Hex, u64) {
        (Sha256Hex::new(hex::encode(self.hasher.finalize())), self.count)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

pub fn sha256_reader(reader: impl Read) -> io::Result<Sha256Hex> {
    let mut hashing = HashingReader::new(reader);
    io::copy(&mut hashing, &mut io::sink())?;
    Ok(hashing.finish().0)
}

/// Stream a file through SHA-256 and return the lowercase hex digest.
pub fn sha256_file(path: &Path) -> Result<Sha256Hex, StoreError> {
    let read_err = |source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    sha256_reader(BufReader::new(file)).map_err(read_err)
}

/// `create_dir_all` that treats an empty path as "nothing to create".
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(path)
}

/// Copy `src` over `dst`, creating `dst`'s parent directories first.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, StoreError> {
    let copy_err = |source| StoreError::Copy {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source,
    };
    if let Some(parent) = dst.parent() {
        ensure_dir(parent).map_err(copy_err)?;
    }
    let mut reader = File::open(src).map_err(copy_err)?;
    let mut writer = File::create(dst).map_err(copy_err)?;
    let n = io::copy(&mut reader, &mut writer).map_err(copy_err)?;
    writer.sync_all().map_err(copy_err)?;
    Ok(n)
}

/// Check a computed digest against an optional expectation.
///
/// An empty `expected` means no commitment was made and always passes.
pub fn verify_digest(subject: &str, expected: &str, actual: &Sha256Hex) -> Result<(), StoreError> {
    if expected.is_empty() || actual == expected {
        Ok(())
    } else {
        Err(StoreError::ChecksumMismatch {
            subject: subject.to_owned(),
            expected: expected.to_owned(),
            actual: actual.to_string(),
        })
    }
}
