use crate::exec::{run_command, CommandSpec, Executor, ProcessOutput};
use crate::RuntimeError;
use sofpack_schema::CommitHash;
use std::path::Path;

fn git_step(
    exec: &dyn Executor,
    action: &'static str,
    cmd: &CommandSpec,
) -> Result<ProcessOutput, RuntimeError> {
    run_command(exec, cmd).map_err(|e| RuntimeError::Git {
        action,
        source: Box::new(e),
    })
}

/// `git clone <repo> -b <branch> <dir>`
pub fn clone(
    exec: &dyn Executor,
    git: &str,
    repo: &str,
    branch: &str,
    dir: &Path,
) -> Result<(), RuntimeError> {
    let dir = dir.to_string_lossy();
    let cmd = CommandSpec::new(git).args(["clone", repo, "-b", branch, &*dir]);
    git_step(exec, "clone", &cmd).map(drop)
}

pub fn checkout(exec: &dyn Executor, git: &str, tree: &Path, rev: &str) -> Result<(), RuntimeError> {
    let cmd = CommandSpec::new(git).args(["checkout", rev]).current_dir(tree);
    git_step(exec, "checkout", &cmd).map(drop)
}

/// Resolve `HEAD` of `tree` to a full object name.
pub fn rev_parse_head(exec: &dyn Executor, git: &str, tree: &Path) -> Result<CommitHash, RuntimeError> {
    let cmd = CommandSpec::new(git).args(["rev-parse", "HEAD"]).current_dir(tree);
    let out = git_step(exec, "rev-parse", &cmd)?;
    let rev = out.stdout_lossy().trim().to_owned();
    if !CommitHash::is_concrete(&rev) {
        return Err(RuntimeError::InvalidRevision(rev));
    }
    Ok(CommitHash::new(rev))
}
