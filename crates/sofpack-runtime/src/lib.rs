//! External process layer for sofpack.
//!
//! Everything that shells out lives here: the `Executor` seam with its real
//! (`ProcessExecutor`) and scripted (`MockExecutor`) implementations, git
//! source acquisition, container image pinning, the firmware/topology build
//! invocation, and prerequisite checks for the host tools involved.

pub mod docker;
pub mod exec;
pub mod git;
pub mod invoke;
pub mod mock;
pub mod prereq;
pub mod source;

pub use docker::{parse_repo_digest, pin_image, InspectError, LOCAL_IMAGE_TAG};
pub use exec::{run_command, CancelToken, CommandSpec, Executor, ProcessExecutor, ProcessOutput};
pub use invoke::{prepare_invocation, run_build_step, BuildStep, Invocation};
pub use mock::{MockExecutor, MockResponse};
pub use prereq::{check_prereqs, format_missing, MissingPrereq, Toolchain};
pub use source::{acquire_source, install_blobs};

use sofpack_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed: {status}")]
    CommandFailed {
        command: String,
        status: String,
        /// Everything the tool printed, stdout and stderr interleaved.
        output: Vec<u8>,
    },
    #[error("interrupted")]
    Cancelled,
    #[error("git {action} failed: {source}")]
    Git {
        action: &'static str,
        #[source]
        source: Box<RuntimeError>,
    },
    #[error("git rev-parse returned an invalid revision: {0:?}")]
    InvalidRevision(String),
    #[error("failed to pull {reference}: {source}")]
    ContainerPull {
        reference: String,
        #[source]
        source: Box<RuntimeError>,
    },
    #[error("cannot resolve digest of {reference}: {source}")]
    ContainerDigest {
        reference: String,
        #[source]
        source: InspectError,
    },
    #[error("failed to tag {digest}: {source}")]
    ContainerTag {
        digest: String,
        #[source]
        source: Box<RuntimeError>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RuntimeError {
    /// True if the failure is a digest commitment that did not hold.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_integrity_failure())
    }

    /// True if the run was stopped by the user, at any nesting depth.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Git { source, .. }
            | Self::ContainerPull { source, .. }
            | Self::ContainerTag { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Output of the failed command underneath this error, if any.
    pub fn tool_output(&self) -> Option<&[u8]> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            Self::Git { source, .. }
            | Self::ContainerPull { source, .. }
            | Self::ContainerTag { source, .. }
            | Self::ContainerDigest {
                source: InspectError::Command(source),
                ..
            } => source.tool_output(),
            _ => None,
        }
    }
}
