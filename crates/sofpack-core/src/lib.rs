//! Pipeline orchestration for sofpack.
//!
//! This crate ties together config parsing, source acquisition, container
//! pinning, the external build steps and packaging into the `Builder`, the
//! single entry point for producing a reproducible SOF bundle. It also owns
//! the stage state machine and the Ctrl-C cancellation wiring.

pub mod concurrency;
pub mod engine;
pub mod lifecycle;

pub use concurrency::install_signal_handler;
pub use engine::{BuildOptions, BuildReport, Builder};
pub use lifecycle::{validate_transition, Pipeline, Stage};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] sofpack_schema::ConfigError),
    #[error(transparent)]
    Store(#[from] sofpack_store::StoreError),
    #[error(transparent)]
    Runtime(#[from] sofpack_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("{0}")]
    Prerequisites(String),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// The underlying error with any stage context peeled off.
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self.root(), Self::Config(_))
    }

    /// True if a declared digest did not match the content it describes.
    pub fn is_integrity_failure(&self) -> bool {
        match self.root() {
            Self::Store(e) => e.is_integrity_failure(),
            Self::Runtime(e) => e.is_integrity_failure(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Runtime(e) if e.is_cancelled())
    }

    /// What the failed external tool printed, when a subprocess is the cause.
    pub fn tool_output(&self) -> Option<&[u8]> {
        match self.root() {
            Self::Runtime(e) => e.tool_output(),
            _ => None,
        }
    }
}
