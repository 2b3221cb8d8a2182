use crate::CoreError;
use std::fmt;
use tracing::{debug, info};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Init,
    ResolveConfig,
    AcquireSource,
    InstallBlobs,
    BuildFirmware,
    BuildTopology,
    PackageTarball,
    WriteManifest,
    Done,
    Failed,
}

impl Stage {
    /// Stages that run only when the config asks for them.
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            Self::InstallBlobs | Self::BuildFirmware | Self::BuildTopology
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    const ORDERED: [Stage; 9] = [
        Self::Init,
        Self::ResolveConfig,
        Self::AcquireSource,
        Self::InstallBlobs,
        Self::BuildFirmware,
        Self::BuildTopology,
        Self::PackageTarball,
        Self::WriteManifest,
        Self::Done,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::ResolveConfig => "resolve-config",
            Self::AcquireSource => "acquire-source",
            Self::InstallBlobs => "install-blobs",
            Self::BuildFirmware => "build-firmware",
            Self::BuildTopology => "build-topology",
            Self::PackageTarball => "package-tarball",
            Self::WriteManifest => "write-manifest",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Stages only move forward. Optional stages may be skipped, mandatory ones
/// may not, and any stage that has not finished can fail.
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), CoreError> {
    let valid = if from.is_terminal() {
        false
    } else if to == Stage::Failed {
        true
    } else {
        from < to
            && Stage::ORDERED
                .iter()
                .filter(|s| **s > from && **s < to)
                .all(|s| s.is_optional())
    };

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

/// Tracks the current stage of one build and attaches stage context to errors.
#[derive(Debug)]
pub struct Pipeline {
    current: Stage,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            current: Stage::Init,
        }
    }

    /// Resume tracking from a stage that was completed elsewhere.
    pub fn starting_at(stage: Stage) -> Self {
        Self { current: stage }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn advance(&mut self, to: Stage) -> Result<(), CoreError> {
        validate_transition(self.current, to)?;
        debug!("stage {} -> {to}", self.current);
        self.current = to;
        Ok(())
    }

    /// Enter `stage` and run `f`. A failure moves the pipeline to
    /// [`Stage::Failed`] and is wrapped with the stage name.
    pub fn run<T, E>(&mut self, stage: Stage, f: impl FnOnce() -> Result<T, E>) -> Result<T, CoreError>
    where
        E: Into<CoreError>,
    {
        self.advance(stage)?;
        info!("{stage}");
        f().map_err(|e| {
            self.current = Stage::Failed;
            CoreError::Stage {
                stage,
                source: Box::new(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(Stage::Init, Stage::ResolveConfig).is_ok());
        assert!(validate_transition(Stage::ResolveConfig, Stage::AcquireSource).is_ok());
        assert!(validate_transition(Stage::AcquireSource, Stage::InstallBlobs).is_ok());
        assert!(validate_transition(Stage::AcquireSource, Stage::BuildTopology).is_ok());
        assert!(validate_transition(Stage::AcquireSource, Stage::PackageTarball).is_ok());
        assert!(validate_transition(Stage::PackageTarball, Stage::WriteManifest).is_ok());
        assert!(validate_transition(Stage::WriteManifest, Stage::Done).is_ok());
        assert!(validate_transition(Stage::BuildFirmware, Stage::Failed).is_ok());
        assert!(validate_transition(Stage::Init, Stage::Failed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(Stage::PackageTarball, Stage::AcquireSource).is_err());
        assert!(validate_transition(Stage::AcquireSource, Stage::AcquireSource).is_err());
        assert!(validate_transition(Stage::Init, Stage::AcquireSource).is_err());
        assert!(validate_transition(Stage::AcquireSource, Stage::WriteManifest).is_err());
        assert!(validate_transition(Stage::PackageTarball, Stage::Done).is_err());
        assert!(validate_transition(Stage::Done, Stage::Failed).is_err());
        assert!(validate_transition(Stage::Failed, Stage::Done).is_err());
    }

    #[test]
    fn run_wraps_errors_with_stage() {
        let mut p = Pipeline::starting_at(Stage::ResolveConfig);
        let err = p
            .run(Stage::AcquireSource, || -> Result<(), std::io::Error> {
                Err(std::io::Error::other("network down"))
            })
            .unwrap_err();
        assert_eq!(p.current(), Stage::Failed);
        assert_eq!(err.to_string(), "acquire-source failed: I/O error: network down");
        assert!(p.advance(Stage::PackageTarball).is_err());
    }

    #[test]
    fn run_rejects_out_of_order_stage() {
        let mut p = Pipeline::new();
        let err = p
            .run(Stage::PackageTarball, || -> Result<(), CoreError> { Ok(()) })
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: Stage::Init,
                to: Stage::PackageTarball
            }
        ));
        assert_eq!(p.current(), Stage::Init);
    }
}
