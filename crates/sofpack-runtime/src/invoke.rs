use crate::docker::{pin_image, LOCAL_IMAGE_TAG};
use crate::exec::{run_command, CommandSpec, Executor};
use crate::RuntimeError;
use sofpack_schema::{DockerConfig, ImageRef};
use std::fmt;
use std::path::Path;
use tracing::info;

const XTENSA_BUILD_ALL: &str = "./scripts/xtensa-build-all.sh";
const BUILD_TOOLS: &str = "./scripts/build-tools.sh";
const DOCKER_RUN: &str = "./scripts/docker-run.sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Firmware,
    Topology,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firmware => write!(f, "firmware"),
            Self::Topology => write!(f, "topology"),
        }
    }
}

impl BuildStep {
    /// The in-tree script invocation for this step.
    pub fn argv(self, build_args: &[String]) -> Vec<String> {
        match self {
            Self::Firmware => std::iter::once(XTENSA_BUILD_ALL.to_owned())
                .chain(build_args.iter().cloned())
                .collect(),
            Self::Topology => vec![BUILD_TOOLS.to_owned(), "-T".to_owned()],
        }
    }
}

/// How a build step is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Direct,
    /// Through `docker-run.sh`, against an image already pinned and retagged.
    Containerized { image: ImageRef },
}

impl Invocation {
    pub fn command(&self, step: BuildStep, build_args: &[String], tree: &Path) -> CommandSpec {
        let argv = step.argv(build_args);
        let spec = match self {
            Self::Direct => {
                let mut it = argv.into_iter();
                let program = it.next().unwrap_or_default();
                CommandSpec::new(program).args(it)
            }
            Self::Containerized { .. } => CommandSpec::new(DOCKER_RUN).args(argv),
        };
        spec.current_dir(tree)
    }
}

/// Decide how to run a step, pinning the container image when asked to.
///
/// When containerized, the pinned digest is written back to `docker.identifier`.
pub fn prepare_invocation(
    exec: &dyn Executor,
    docker_bin: &str,
    docker: Option<&mut DockerConfig>,
) -> Result<Invocation, RuntimeError> {
    match docker {
        Some(d) if d.use_container => {
            let reference = d.effective_identifier().to_owned();
            let image = pin_image(exec, docker_bin, &reference, LOCAL_IMAGE_TAG)?;
            d.identifier = image.to_string();
            Ok(Invocation::Containerized { image })
        }
        _ => Ok(Invocation::Direct),
    }
}

pub fn run_build_step(
    exec: &dyn Executor,
    step: BuildStep,
    build_args: &[String],
    invocation: &Invocation,
    tree: &Path,
) -> Result<(), RuntimeError> {
    let cmd = invocation.command(step, build_args, tree);
    match invocation {
        Invocation::Direct => info!("building {step}"),
        Invocation::Containerized { image } => info!("building {step} in {image}"),
    }
    run_command(exec, &cmd)?;
    info!("{step} build succeeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockExecutor, MockResponse};

    const DIGEST: &str = "thesofproject/sof@sha256:0000000000000000000000000000000000000000000000000000000000000001";

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn direct_firmware_command() {
        let cmd = Invocation::Direct.command(BuildStep::Firmware, &args(&["-a", "tgl"]), Path::new("/t"));
        assert_eq!(cmd.to_string(), "./scripts/xtensa-build-all.sh -a tgl");
        assert_eq!(cmd.cwd.as_deref(), Some(Path::new("/t")));
    }

    #[test]
    fn topology_ignores_build_args() {
        let cmd = Invocation::Direct.command(BuildStep::Topology, &args(&["-a"]), Path::new("/t"));
        assert_eq!(cmd.to_string(), "./scripts/build-tools.sh -T");
    }

    #[test]
    fn containerized_command_is_wrapped() {
        let inv = Invocation::Containerized {
            image: ImageRef::new(DIGEST),
        };
        let fw = inv.command(BuildStep::Firmware, &args(&["tgl"]), Path::new("/t"));
        assert_eq!(
            fw.to_string(),
            "./scripts/docker-run.sh ./scripts/xtensa-build-all.sh tgl"
        );
        let tp = inv.command(BuildStep::Topology, &[], Path::new("/t"));
        assert_eq!(tp.to_string(), "./scripts/docker-run.sh ./scripts/build-tools.sh -T");
        assert_eq!(tp.cwd.as_deref(), Some(Path::new("/t")));
    }

    #[test]
    fn no_docker_section_is_direct() {
        let mock = MockExecutor::default();
        assert_eq!(prepare_invocation(&mock, "docker", None).unwrap(), Invocation::Direct);
        let mut d = DockerConfig {
            identifier: "x".to_owned(),
            use_container: false,
        };
        assert_eq!(
            prepare_invocation(&mock, "docker", Some(&mut d)).unwrap(),
            Invocation::Direct
        );
        assert!(mock.calls().is_empty());
        assert_eq!(d.identifier, "x");
    }

    #[test]
    fn container_use_pins_default_image_and_writes_back() {
        let json = serde_json::json!([{ "RepoDigests": [DIGEST] }]).to_string();
        let mock = MockExecutor::new(move |cmd| {
            if cmd.args.first().is_some_and(|a| a == "image") {
                MockResponse::ok_with_stdout(json.clone())
            } else {
                MockResponse::ok()
            }
        });
        let mut d = DockerConfig {
            identifier: String::new(),
            use_container: true,
        };
        let inv = prepare_invocation(&mock, "docker", Some(&mut d)).unwrap();
        assert_eq!(
            inv,
            Invocation::Containerized {
                image: ImageRef::new(DIGEST)
            }
        );
        assert_eq!(d.identifier, DIGEST);
        assert_eq!(mock.command_lines()[0], "docker pull thesofproject/sof:latest");
    }

    #[test]
    fn failing_build_step_is_error() {
        let mock = MockExecutor::new(|_| MockResponse::fail(2, "xtensa-build-all: unknown platform"));
        let err = run_build_step(
            &mock,
            BuildStep::Firmware,
            &args(&["bogus"]),
            &Invocation::Direct,
            Path::new("/t"),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed { .. }));
        assert!(err.to_string().contains("exit status 2"));
    }

    #[test]
    fn step_names() {
        assert_eq!(BuildStep::Firmware.to_string(), "firmware");
        assert_eq!(BuildStep::Topology.to_string(), "topology");
    }
}
