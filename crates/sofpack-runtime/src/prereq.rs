use std::fmt;
use std::process::Command;

/// Names of the host tools sofpack shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub git: String,
    pub docker: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            git: "git".to_owned(),
            docker: "docker".to_owned(),
        }
    }
}

impl Toolchain {
    /// Defaults, overridden by `SOFPACK_GIT` / `SOFPACK_DOCKER` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pick = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let defaults = Self::default();
        Self {
            git: pick("SOFPACK_GIT", defaults.git),
            docker: pick("SOFPACK_DOCKER", defaults.docker),
        }
    }
}

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools a build needs. Docker is only required when a step is containerized.
pub fn check_prereqs(tools: &Toolchain, needs_docker: bool) -> Vec<MissingPrereq> {
    check_with(tools, needs_docker, command_exists)
}

fn check_with(
    tools: &Toolchain,
    needs_docker: bool,
    exists: impl Fn(&str) -> bool,
) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !exists(&tools.git) {
        missing.push(MissingPrereq {
            name: tools.git.clone(),
            purpose: "cloning the SOF source tree",
            install_hint: "zypper install git | apt install git | dnf install git | pacman -S git",
        });
    }

    if needs_docker && !exists(&tools.docker) {
        missing.push(MissingPrereq {
            name: tools.docker.clone(),
            purpose: "pinning and running the SOF build container",
            install_hint: "install Docker Engine, or point SOFPACK_DOCKER at a compatible CLI",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nsofpack drives these tools to fetch and build the firmware.");
    msg
}
