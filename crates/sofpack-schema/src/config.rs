use crate::textproto::{from_textproto, TextprotoError};
use crate::types::Sha256Hex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path};
use thiserror::Error;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_DOCKER_IMAGE: &str = "thesofproject/sof:latest";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to parse config: {0}")]
    ParseTextproto(#[from] TextprotoError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// On-disk encoding of a [`BuildConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Textproto,
}

impl ConfigFormat {
    /// `.toml` files are TOML; everything else is read as protobuf text format.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Textproto,
        }
    }
}

/// The root build record.
///
/// A `BuildConfig` starts out as a request and is enriched in place by every
/// pipeline stage: the commit is resolved, container references are replaced
/// by digests, and every blob and artifact gets its SHA-256. The final state is
/// what gets written to the `.config.textproto` snapshot.
///
/// Empty strings mean "unset" for all optional string fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_blob: Vec<ExtraBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Firmware>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact: Vec<Artifact>,
    #[serde(default)]
    pub tarball: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub flat_tarball: bool,
}

/// A file copied from next to the config into the cloned tree before building.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExtraBlob {
    /// Relative to the config file's directory.
    pub src: String,
    /// Relative to the source tree root.
    pub dst: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Firmware {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_arg: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Topology {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DockerConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,
    #[serde(rename = "use", default)]
    pub use_container: bool,
}

/// A built file selected for the archive.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Artifact {
    /// Location inside the built source tree.
    pub built_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

impl DockerConfig {
    /// The configured image reference, or [`DEFAULT_DOCKER_IMAGE`] when unset.
    pub fn effective_identifier(&self) -> &str {
        if self.identifier.is_empty() {
            DEFAULT_DOCKER_IMAGE
        } else {
            &self.identifier
        }
    }
}

impl Artifact {
    /// Display name inside the archive, defaulting to the base name of `built_path`.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        Path::new(&self.built_path)
            .file_name()
            .map_or_else(|| self.built_path.clone(), |n| n.to_string_lossy().into_owned())
    }
}

impl BuildConfig {
    /// Replace the configured commit with an externally supplied one.
    pub fn apply_commit_override(&mut self, commit: Option<&str>) {
        if let Some(c) = commit {
            self.commit = c.trim().to_owned();
        }
    }

    /// Fill in defaults and canonicalise digests. Idempotent.
    pub fn normalize(&mut self) {
        if self.branch.is_empty() {
            DEFAULT_BRANCH.clone_into(&mut self.branch);
        }
        for blob in &mut self.extra_blob {
            blob.sha256 = blob.sha256.trim().to_ascii_lowercase();
        }
        for artifact in &mut self.artifact {
            artifact.sha256 = artifact.sha256.trim().to_ascii_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo.trim().is_empty() {
            return Err(ConfigError::Invalid("repo must not be empty".to_owned()));
        }
        if self.tarball.trim().is_empty() {
            return Err(ConfigError::Invalid("tarball must not be empty".to_owned()));
        }
        check_bare_name("tarball", &self.tarball)?;
        check_bare_name("version", &self.version)?;
        for (i, blob) in self.extra_blob.iter().enumerate() {
            if blob.src.is_empty() || blob.dst.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "extra_blob[{i}]: src and dst must not be empty"
                )));
            }
            check_relative(&format!("extra_blob[{i}].src"), &blob.src)?;
            check_relative(&format!("extra_blob[{i}].dst"), &blob.dst)?;
            check_digest(&format!("extra_blob[{i}].sha256"), &blob.sha256)?;
        }
        for (i, artifact) in self.artifact.iter().enumerate() {
            if artifact.built_path.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "artifact[{i}]: built_path must not be empty"
                )));
            }
            check_relative(&format!("artifact[{i}].built_path"), &artifact.built_path)?;
            if !artifact.name.is_empty() {
                check_relative(&format!("artifact[{i}].name"), &artifact.name)?;
            }
            check_digest(&format!("artifact[{i}].sha256"), &artifact.sha256)?;
        }
        Ok(())
    }

    /// True if any build step asks for containerized execution.
    pub fn uses_container(&self) -> bool {
        let fw = self
            .firmware
            .as_ref()
            .and_then(|f| f.docker.as_ref())
            .is_some_and(|d| d.use_container);
        let tplg = self
            .topology
            .as_ref()
            .and_then(|t| t.docker.as_ref())
            .is_some_and(|d| d.use_container);
        fw || tplg
    }
}

/// Output file names are built from these, so they must not carry a path.
fn check_bare_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a bare name, got '{value}'"
        )));
    }
    Ok(())
}

/// Paths joined onto the config dir or the source tree must stay beneath it.
fn check_relative(field: &str, value: &str) -> Result<(), ConfigError> {
    let escapes = value.starts_with('\\')
        || Path::new(value).components().any(|c| {
            matches!(
                c,
                Component::RootDir | Component::Prefix(_) | Component::ParentDir
            )
        });
    if escapes {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a relative path without '..', got '{value}'"
        )));
    }
    Ok(())
}

fn check_digest(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || Sha256Hex::is_well_formed(value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field}: '{value}' is not a hex sha256 digest"
        )))
    }
}

pub fn parse_config_str(input: &str, format: ConfigFormat) -> Result<BuildConfig, ConfigError> {
    match format {
        ConfigFormat::Toml => Ok(toml::from_str(input)?),
        ConfigFormat::Textproto => Ok(from_textproto(input)?),
    }
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<BuildConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_config_str(&content, ConfigFormat::from_path(path))
}
