//! Build configuration schema for sofpack.
//!
//! This crate defines the `BuildConfig` record that drives a packaging run and
//! doubles as its receipt: stages fill in resolved commits, image digests and
//! content checksums as they go. It also provides the two on-disk encodings of
//! that record: TOML for hand-written configs and a canonical protobuf text
//! format (`textproto`) used for reproducible snapshots.

pub mod config;
pub mod textproto;
pub mod types;

pub use config::{
    parse_config_file, parse_config_str, Artifact, BuildConfig, ConfigError, ConfigFormat,
    DockerConfig, ExtraBlob, Firmware, Topology, DEFAULT_BRANCH, DEFAULT_DOCKER_IMAGE,
};
pub use textproto::{from_textproto, to_textproto, TextprotoError};
pub use types::{CommitHash, ImageRef, Sha256Hex};
