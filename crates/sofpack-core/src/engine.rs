use crate::lifecycle::{Pipeline, Stage};
use crate::CoreError;
use serde::Serialize;
use sofpack_runtime::{
    acquire_source, check_prereqs, format_missing, install_blobs, prepare_invocation,
    run_build_step, BuildStep, Executor, Toolchain,
};
use sofpack_schema::{parse_config_file, BuildConfig};
use sofpack_store::{package_tarball, write_metadata, ArchiveNames, Sidecars};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Where the archive and its sidecars are written.
    pub out_dir: PathBuf,
    /// Replaces the config's `commit` before the source is acquired.
    pub commit_override: Option<String>,
    pub keep_build_dir: bool,
    pub check_prereqs: bool,
    pub toolchain: Toolchain,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            commit_override: None,
            keep_build_dir: false,
            check_prereqs: true,
            toolchain: Toolchain::default(),
        }
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub commit: String,
    pub tarball: PathBuf,
    pub config_snapshot: PathBuf,
    pub manifest: PathBuf,
    pub size: u64,
    pub blake2b: String,
    pub sha512: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<PathBuf>,
    /// The fully enriched config, as written to the snapshot.
    pub config: BuildConfig,
}

/// Paths produced by the packaging stages.
#[derive(Debug, Clone)]
pub struct BuildOutputs {
    pub tarball: PathBuf,
    pub sidecars: Sidecars,
}

/// Runs the packaging pipeline against one executor.
pub struct Builder {
    executor: Box<dyn Executor>,
    options: BuildOptions,
}

impl Builder {
    pub fn new(executor: Box<dyn Executor>, options: BuildOptions) -> Self {
        Self { executor, options }
    }

    /// Build and package everything described by the config at `config_path`.
    ///
    /// Blob sources are resolved relative to the config's directory. The
    /// scratch directory is removed afterwards unless `keep_build_dir` is set.
    pub fn build(&self, config_path: &Path) -> Result<BuildReport, CoreError> {
        info!("building from {}", config_path.display());
        let mut pipeline = Pipeline::new();
        let mut config = pipeline.run(Stage::ResolveConfig, || {
            let config = self.resolve_config(config_path)?;
            self.ensure_prereqs(&config)?;
            Ok::<_, CoreError>(config)
        })?;

        let base_dir = match config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let scratch = tempfile::Builder::new().prefix("sofpack-").tempdir()?;
        let result = self.run_stages(&mut pipeline, &base_dir, &mut config, scratch.path());

        let build_dir = if self.options.keep_build_dir {
            let path = scratch.keep();
            if result.is_err() {
                warn!("build directory kept at {}", path.display());
            } else {
                info!("build directory kept at {}", path.display());
            }
            Some(path)
        } else {
            if let Err(e) = scratch.close() {
                warn!("failed to remove build directory: {e}");
            }
            None
        };

        let outputs = result?;
        Ok(BuildReport {
            commit: config.commit.clone(),
            tarball: outputs.tarball,
            config_snapshot: outputs.sidecars.config_snapshot,
            manifest: outputs.sidecars.manifest,
            size: outputs.sidecars.digests.size,
            blake2b: outputs.sidecars.digests.blake2b,
            sha512: outputs.sidecars.digests.sha512,
            build_dir,
            config,
        })
    }

    /// Run every stage after config resolution against a caller-owned
    /// config and build directory. The source tree goes to `build_dir/sof`.
    pub fn build_config(
        &self,
        base_dir: &Path,
        config: &mut BuildConfig,
        build_dir: &Path,
    ) -> Result<BuildOutputs, CoreError> {
        let mut pipeline = Pipeline::starting_at(Stage::ResolveConfig);
        self.run_stages(&mut pipeline, base_dir, config, build_dir)
    }

    fn resolve_config(&self, path: &Path) -> Result<BuildConfig, CoreError> {
        let mut config = parse_config_file(path)?;
        config.apply_commit_override(self.options.commit_override.as_deref());
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Host tools are looked up once the config says whether docker is needed.
    fn ensure_prereqs(&self, config: &BuildConfig) -> Result<(), CoreError> {
        if !self.options.check_prereqs {
            return Ok(());
        }
        let missing = check_prereqs(&self.options.toolchain, config.uses_container());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Prerequisites(format_missing(&missing)))
        }
    }

    fn run_stages(
        &self,
        pipeline: &mut Pipeline,
        base_dir: &Path,
        config: &mut BuildConfig,
        build_dir: &Path,
    ) -> Result<BuildOutputs, CoreError> {
        let exec = self.executor.as_ref();
        let tools = &self.options.toolchain;
        let tree = build_dir.join("sof");

        pipeline.run(Stage::AcquireSource, || {
            acquire_source(exec, &tools.git, config, &tree)
        })?;

        if !config.extra_blob.is_empty() {
            pipeline.run(Stage::InstallBlobs, || {
                install_blobs(base_dir, &tree, &mut config.extra_blob)
            })?;
        }

        if let Some(fw) = config.firmware.as_mut() {
            pipeline.run(Stage::BuildFirmware, || {
                let inv = prepare_invocation(exec, &tools.docker, fw.docker.as_mut())?;
                run_build_step(exec, BuildStep::Firmware, &fw.build_arg, &inv, &tree)
            })?;
        }

        if let Some(tplg) = config.topology.as_mut() {
            pipeline.run(Stage::BuildTopology, || {
                let inv = prepare_invocation(exec, &tools.docker, tplg.docker.as_mut())?;
                run_build_step(exec, BuildStep::Topology, &[], &inv, &tree)
            })?;
        }

        let names = ArchiveNames::for_config(&self.options.out_dir, config);
        let tarball = pipeline.run(Stage::PackageTarball, || {
            package_tarball(config, &tree, &names)
        })?;
        let sidecars = pipeline.run(Stage::WriteManifest, || {
            write_metadata(config, &tarball, &names)
        })?;
        pipeline.advance(Stage::Done)?;

        info!("packaged {} at commit {}", tarball.display(), config.commit);
        Ok(BuildOutputs { tarball, sidecars })
    }
}
