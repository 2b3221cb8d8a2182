use crate::exec::Executor;
use crate::{git, RuntimeError};
use sofpack_schema::{BuildConfig, ExtraBlob, DEFAULT_BRANCH};
use sofpack_store::{copy_file, join_within, sha256_file, verify_digest};
use std::path::Path;
use tracing::{debug, info};

/// Clone `config.repo` into `tree` and pin `config.commit` to the checked-out HEAD.
///
/// An empty branch falls back to [`DEFAULT_BRANCH`]. A configured commit is
/// checked out after cloning; either way the resolved hash replaces it.
pub fn acquire_source(
    exec: &dyn Executor,
    git_bin: &str,
    config: &mut BuildConfig,
    tree: &Path,
) -> Result<(), RuntimeError> {
    if config.branch.is_empty() {
        DEFAULT_BRANCH.clone_into(&mut config.branch);
    }

    info!("cloning {} ({})", config.repo, config.branch);
    git::clone(exec, git_bin, &config.repo, &config.branch, tree)?;

    if !config.commit.is_empty() {
        info!("checking out {}", config.commit);
        git::checkout(exec, git_bin, tree, &config.commit)?;
    }

    let head = git::rev_parse_head(exec, git_bin, tree)?;
    info!("source at {head}");
    config.commit = head.into_inner();
    Ok(())
}

/// Copy each blob from `base_dir` into `tree`, verifying declared digests first.
///
/// A mismatching blob is never copied. The computed digest of every blob is
/// written back.
pub fn install_blobs(
    base_dir: &Path,
    tree: &Path,
    blobs: &mut [ExtraBlob],
) -> Result<(), RuntimeError> {
    for blob in blobs {
        let src = join_within(base_dir, &blob.src)?;
        let dst = join_within(tree, &blob.dst)?;
        let digest = sha256_file(&src)?;
        verify_digest(&blob.src, &blob.sha256, &digest)?;
        copy_file(&src, &dst)?;
        debug!("installed {} -> {} (sha256 {digest})", src.display(), dst.display());
        blob.sha256 = digest.into_inner();
    }
    Ok(())
}
