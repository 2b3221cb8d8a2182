//! Protobuf text format codec for [`BuildConfig`].
//!
//! The config is described to `prost-reflect` by a descriptor assembled in
//! code, equivalent to:
//!
//! ```proto
//! syntax = "proto3";
//! package sofpack.v1;
//!
//! message DockerConfig { string identifier = 1; bool use = 2; }
//! message ExtraBlob { string src = 1; string dst = 2; string sha256 = 3; }
//! message Firmware { repeated string build_arg = 1; DockerConfig docker = 2; }
//! message Topology { DockerConfig docker = 1; }
//! message Artifact { string built_path = 1; string name = 2; string sha256 = 3; }
//! message BuildConfig {
//!   string repo = 1;
//!   string branch = 2;
//!   string commit = 3;
//!   repeated ExtraBlob extra_blob = 4;
//!   Firmware firmware = 5;
//!   Topology topology = 6;
//!   repeated Artifact artifact = 7;
//!   string tarball = 8;
//!   string version = 9;
//!   bool flat_tarball = 10;
//! }
//! ```
//!
//! Text is parsed into a `DynamicMessage` and mapped field by field onto the
//! serde structs; the snapshot goes the other way and is printed in the
//! expanded multi-line form.

use crate::config::{Artifact, BuildConfig, DockerConfig, ExtraBlob, Firmware, Topology};
use prost_reflect::text_format::{FormatOptions, ParseError};
use prost_reflect::prost_types::field_descriptor_proto::{Label, Type};
use prost_reflect::prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
};
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, Value};
use std::sync::OnceLock;
use thiserror::Error;

const PACKAGE: &str = "sofpack.v1";

/// Deepest `{`/`<` nesting accepted before parsing. The schema itself needs 3.
pub const MAX_NESTING: usize = 32;

#[derive(Debug, Error)]
pub enum TextprotoError {
    #[error("line {line}: messages nested deeper than {limit} levels")]
    TooDeep { line: usize, limit: usize },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' has unexpected type")]
    FieldType { field: &'static str },
    #[error("config schema: {0}")]
    Schema(String),
}

pub fn from_textproto(input: &str) -> Result<BuildConfig, TextprotoError> {
    check_nesting(input)?;
    let msg = DynamicMessage::parse_text_format(message("BuildConfig")?, input)?;
    build_config(&msg)
}

/// Canonical snapshot text: schema field order, defaults omitted, every
/// message expanded over its own lines.
pub fn to_textproto(config: &BuildConfig) -> Result<String, TextprotoError> {
    let msg = build_config_message(config)?;
    let mut text = msg.to_text_format_with_options(&FormatOptions::new().pretty(true));
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

/// Reject pathological nesting before handing the input to the recursive parser.
fn check_nesting(input: &str) -> Result<(), TextprotoError> {
    let mut depth = 0usize;
    let mut line = 1;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut comment = false;

    for c in input.chars() {
        if c == '\n' {
            line += 1;
            comment = false;
        }
        if comment {
            continue;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q || c == '\n' {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '#' => comment = true,
            '{' | '<' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(TextprotoError::TooDeep {
                        line,
                        limit: MAX_NESTING,
                    });
                }
            }
            '}' | '>' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

// Descriptor

fn string_field(name: &str, number: i32) -> FieldDescriptorProto {
    scalar(name, number, Label::Optional, Type::String)
}

fn scalar(name: &str, number: i32, label: Label, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_owned()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        ..FieldDescriptorProto::default()
    }
}

fn message_field(name: &str, number: i32, label: Label, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(format!(".{PACKAGE}.{type_name}")),
        ..scalar(name, number, label, Type::Message)
    }
}

fn message_type(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_owned()),
        field,
        ..DescriptorProto::default()
    }
}

fn file_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("sofpack/v1/build_config.proto".to_owned()),
        package: Some(PACKAGE.to_owned()),
        syntax: Some("proto3".to_owned()),
        message_type: vec![
            message_type(
                "DockerConfig",
                vec![
                    string_field("identifier", 1),
                    scalar("use", 2, Label::Optional, Type::Bool),
                ],
            ),
            message_type(
                "ExtraBlob",
                vec![
                    string_field("src", 1),
                    string_field("dst", 2),
                    string_field("sha256", 3),
                ],
            ),
            message_type(
                "Firmware",
                vec![
                    scalar("build_arg", 1, Label::Repeated, Type::String),
                    message_field("docker", 2, Label::Optional, "DockerConfig"),
                ],
            ),
            message_type(
                "Topology",
                vec![message_field("docker", 1, Label::Optional, "DockerConfig")],
            ),
            message_type(
                "Artifact",
                vec![
                    string_field("built_path", 1),
                    string_field("name", 2),
                    string_field("sha256", 3),
                ],
            ),
            message_type(
                "BuildConfig",
                vec![
                    string_field("repo", 1),
                    string_field("branch", 2),
                    string_field("commit", 3),
                    message_field("extra_blob", 4, Label::Repeated, "ExtraBlob"),
                    message_field("firmware", 5, Label::Optional, "Firmware"),
                    message_field("topology", 6, Label::Optional, "Topology"),
                    message_field("artifact", 7, Label::Repeated, "Artifact"),
                    string_field("tarball", 8),
                    string_field("version", 9),
                    scalar("flat_tarball", 10, Label::Optional, Type::Bool),
                ],
            ),
        ],
        ..FileDescriptorProto::default()
    }
}

fn descriptor_pool() -> Result<&'static DescriptorPool, TextprotoError> {
    static POOL: OnceLock<Result<DescriptorPool, String>> = OnceLock::new();
    POOL.get_or_init(|| {
        DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
            file: vec![file_descriptor()],
        })
        .map_err(|e| e.to_string())
    })
    .as_ref()
    .map_err(|e| TextprotoError::Schema(e.clone()))
}

fn message(name: &str) -> Result<MessageDescriptor, TextprotoError> {
    descriptor_pool()?
        .get_message_by_name(&format!("{PACKAGE}.{name}"))
        .ok_or_else(|| TextprotoError::Schema(format!("unknown message {name}")))
}

// DynamicMessage -> BuildConfig

fn string(msg: &DynamicMessage, field: &'static str) -> Result<String, TextprotoError> {
    match msg.get_field_by_name(field).as_deref() {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(TextprotoError::FieldType { field }),
        None => Err(TextprotoError::Schema(format!("no field {field}"))),
    }
}

fn required(msg: &DynamicMessage, field: &'static str) -> Result<String, TextprotoError> {
    if msg.has_field_by_name(field) {
        string(msg, field)
    } else {
        Err(TextprotoError::MissingField(field))
    }
}

fn boolean(msg: &DynamicMessage, field: &'static str) -> Result<bool, TextprotoError> {
    match msg.get_field_by_name(field).as_deref() {
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(TextprotoError::FieldType { field }),
        None => Err(TextprotoError::Schema(format!("no field {field}"))),
    }
}

fn list<T>(
    msg: &DynamicMessage,
    field: &'static str,
    mut item: impl FnMut(&Value) -> Result<T, TextprotoError>,
) -> Result<Vec<T>, TextprotoError> {
    match msg.get_field_by_name(field).as_deref() {
        Some(Value::List(values)) => values.iter().map(&mut item).collect(),
        Some(_) => Err(TextprotoError::FieldType { field }),
        None => Err(TextprotoError::Schema(format!("no field {field}"))),
    }
}

fn submessage<T>(
    msg: &DynamicMessage,
    field: &'static str,
    convert: impl FnOnce(&DynamicMessage) -> Result<T, TextprotoError>,
) -> Result<Option<T>, TextprotoError> {
    if !msg.has_field_by_name(field) {
        return Ok(None);
    }
    match msg.get_field_by_name(field).as_deref() {
        Some(Value::Message(m)) => convert(m).map(Some),
        _ => Err(TextprotoError::FieldType { field }),
    }
}

fn as_message<'a>(v: &'a Value, field: &'static str) -> Result<&'a DynamicMessage, TextprotoError> {
    v.as_message().ok_or(TextprotoError::FieldType { field })
}

fn docker(msg: &DynamicMessage) -> Result<DockerConfig, TextprotoError> {
    Ok(DockerConfig {
        identifier: string(msg, "identifier")?,
        use_container: boolean(msg, "use")?,
    })
}

fn build_config(msg: &DynamicMessage) -> Result<BuildConfig, TextprotoError> {
    Ok(BuildConfig {
        repo: required(msg, "repo")?,
        branch: string(msg, "branch")?,
        commit: string(msg, "commit")?,
        extra_blob: list(msg, "extra_blob", |v| {
            let m = as_message(v, "extra_blob")?;
            Ok(ExtraBlob {
                src: required(m, "src")?,
                dst: required(m, "dst")?,
                sha256: string(m, "sha256")?,
            })
        })?,
        firmware: submessage(msg, "firmware", |m| {
            Ok(Firmware {
                build_arg: list(m, "build_arg", |v| {
                    v.as_str()
                        .map(str::to_owned)
                        .ok_or(TextprotoError::FieldType { field: "build_arg" })
                })?,
                docker: submessage(m, "docker", docker)?,
            })
        })?,
        topology: submessage(msg, "topology", |m| {
            Ok(Topology {
                docker: submessage(m, "docker", docker)?,
            })
        })?,
        artifact: list(msg, "artifact", |v| {
            let m = as_message(v, "artifact")?;
            Ok(Artifact {
                built_path: required(m, "built_path")?,
                name: string(m, "name")?,
                sha256: string(m, "sha256")?,
            })
        })?,
        tarball: string(msg, "tarball")?,
        version: string(msg, "version")?,
        flat_tarball: boolean(msg, "flat_tarball")?,
    })
}

// BuildConfig -> DynamicMessage

struct MessageBuilder(DynamicMessage);

impl MessageBuilder {
    fn new(name: &str) -> Result<Self, TextprotoError> {
        Ok(Self(DynamicMessage::new(message(name)?)))
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), TextprotoError> {
        self.0
            .try_set_field_by_name(field, value)
            .map_err(|e| TextprotoError::Schema(e.to_string()))
    }

    /// Empty strings are proto3 defaults and stay unset.
    fn string(mut self, field: &str, value: &str) -> Result<Self, TextprotoError> {
        if !value.is_empty() {
            self.set(field, Value::String(value.to_owned()))?;
        }
        Ok(self)
    }

    fn boolean(mut self, field: &str, value: bool) -> Result<Self, TextprotoError> {
        if value {
            self.set(field, Value::Bool(true))?;
        }
        Ok(self)
    }

    fn list(mut self, field: &str, values: Vec<Value>) -> Result<Self, TextprotoError> {
        if !values.is_empty() {
            self.set(field, Value::List(values))?;
        }
        Ok(self)
    }

    fn message(mut self, field: &str, value: Option<DynamicMessage>) -> Result<Self, TextprotoError> {
        if let Some(m) = value {
            self.set(field, Value::Message(m))?;
        }
        Ok(self)
    }

    fn finish(self) -> DynamicMessage {
        self.0
    }
}

fn docker_message(d: &DockerConfig) -> Result<DynamicMessage, TextprotoError> {
    Ok(MessageBuilder::new("DockerConfig")?
        .string("identifier", &d.identifier)?
        .boolean("use", d.use_container)?
        .finish())
}

fn build_config_message(c: &BuildConfig) -> Result<DynamicMessage, TextprotoError> {
    let blobs = c
        .extra_blob
        .iter()
        .map(|b| -> Result<Value, TextprotoError> {
            Ok(Value::Message(
                MessageBuilder::new("ExtraBlob")?
                    .string("src", &b.src)?
                    .string("dst", &b.dst)?
                    .string("sha256", &b.sha256)?
                    .finish(),
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let firmware = c
        .firmware
        .as_ref()
        .map(|f| -> Result<DynamicMessage, TextprotoError> {
            let args = f.build_arg.iter().cloned().map(Value::String).collect();
            Ok(MessageBuilder::new("Firmware")?
                .list("build_arg", args)?
                .message("docker", f.docker.as_ref().map(docker_message).transpose()?)?
                .finish())
        })
        .transpose()?;

    let topology = c
        .topology
        .as_ref()
        .map(|t| -> Result<DynamicMessage, TextprotoError> {
            Ok(MessageBuilder::new("Topology")?
                .message("docker", t.docker.as_ref().map(docker_message).transpose()?)?
                .finish())
        })
        .transpose()?;

    let artifacts = c
        .artifact
        .iter()
        .map(|a| -> Result<Value, TextprotoError> {
            Ok(Value::Message(
                MessageBuilder::new("Artifact")?
                    .string("built_path", &a.built_path)?
                    .string("name", &a.name)?
                    .string("sha256", &a.sha256)?
                    .finish(),
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MessageBuilder::new("BuildConfig")?
        .string("repo", &c.repo)?
        .string("branch", &c.branch)?
        .string("commit", &c.commit)?
        .list("extra_blob", blobs)?
        .message("firmware", firmware)?
        .message("topology", topology)?
        .list("artifact", artifacts)?
        .string("tarball", &c.tarball)?
        .string("version", &c.version)?
        .boolean("flat_tarball", c.flat_tarball)?
        .finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BuildConfig {
        BuildConfig {
            repo: "https://github.com/thesofproject/sof".to_owned(),
            branch: "main".to_owned(),
            commit: "0123456789abcdef0123456789abcdef01234567".to_owned(),
            extra_blob: vec![ExtraBlob {
                src: "blobs/key.pem".to_owned(),
                dst: "keys/key.pem".to_owned(),
                sha256: "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
                    .to_owned(),
            }],
            firmware: Some(Firmware {
                build_arg: vec!["-a".to_owned(), "tgl".to_owned()],
                docker: Some(DockerConfig {
                    identifier: "thesofproject/sof@sha256:abcd".to_owned(),
                    use_container: true,
                }),
            }),
            topology: Some(Topology::default()),
            artifact: vec![Artifact {
                built_path: "build_tgl_xcc/sof-tgl.ri".to_owned(),
                name: "sof-tgl.ri".to_owned(),
                sha256: String::new(),
            }],
            tarball: "sof-bin".to_owned(),
            version: "2.2".to_owned(),
            flat_tarball: true,
        }
    }

    #[test]
    fn descriptor_pool_builds() {
        let desc = message("BuildConfig").unwrap();
        assert_eq!(desc.full_name(), "sofpack.v1.BuildConfig");
        assert!(desc.get_field_by_name("flat_tarball").is_some());
        assert!(message("DockerConfig").unwrap().get_field_by_name("use").is_some());
    }

    #[test]
    fn snapshot_parses_back_to_same_config() {
        let config = sample();
        let parsed = from_textproto(&to_textproto(&config).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn output_is_stable() {
        let a = to_textproto(&sample()).unwrap();
        let b = to_textproto(&from_textproto(&a).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn snapshot_is_expanded_in_schema_order() {
        let text = to_textproto(&sample()).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.lines().count() > 10, "not expanded: {text}");
        let pos = |needle: &str| text.find(needle).unwrap();
        assert!(pos("repo:") < pos("commit:"));
        assert!(pos("commit:") < pos("extra_blob"));
        assert!(pos("firmware") < pos("topology"));
        assert!(pos("artifact") < pos("tarball:"));
        assert!(pos("tarball:") < pos("flat_tarball:"));
        assert!(text.contains(
            "sha256: \"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\""
        ));
    }

    #[test]
    fn default_values_are_omitted() {
        let config = BuildConfig {
            repo: "r".to_owned(),
            tarball: "t".to_owned(),
            ..BuildConfig::default()
        };
        let text = to_textproto(&config).unwrap();
        assert!(text.contains("repo: \"r\""));
        assert!(text.contains("tarball: \"t\""));
        assert!(!text.contains("branch"));
        assert!(!text.contains("flat_tarball"));
        assert!(!text.contains("firmware"));
    }

    #[test]
    fn escapes_special_characters() {
        let config = BuildConfig {
            repo: "a\"b\\c\nd".to_owned(),
            ..BuildConfig::default()
        };
        let text = to_textproto(&config).unwrap();
        assert!(!text.contains("c\nd"));
        assert_eq!(from_textproto(&text).unwrap().repo, config.repo);
    }

    #[test]
    fn reads_hand_written_variants() {
        let input = r#"
# SOF release config
repo: 'https://example.com/sof.git'
tarball: "sof-bin"
firmware {
  build_arg: ["-a", "tgl"]
  docker < use: true >
}
artifact { built_path: "a/b.ri"; }
artifact: { built_path: "c.tplg" name: "d.tplg" },
flat_tarball: true
"#;
        let c = from_textproto(input).unwrap();
        assert_eq!(c.repo, "https://example.com/sof.git");
        assert_eq!(c.tarball, "sof-bin");
        let fw = c.firmware.unwrap();
        assert_eq!(fw.build_arg, vec!["-a", "tgl"]);
        assert!(fw.docker.unwrap().use_container);
        assert_eq!(c.artifact.len(), 2);
        assert_eq!(c.artifact[1].name, "d.tplg");
        assert!(c.flat_tarball);
    }

    #[test]
    fn empty_message_keeps_presence() {
        let c = from_textproto("repo: \"r\"\ntopology {}\n").unwrap();
        assert_eq!(c.topology, Some(Topology::default()));
        assert!(c.firmware.is_none());
    }

    #[test]
    fn rejects_unknown_field() {
        let err = from_textproto("repo: \"r\"\nbogus: \"x\"\n").unwrap_err();
        assert!(matches!(err, TextprotoError::Parse(_)));
        assert!(err.to_string().contains("bogus"), "{err}");
    }

    #[test]
    fn rejects_type_mismatch() {
        assert!(from_textproto("repo: true\n").is_err());
        assert!(from_textproto("repo: \"r\"\nflat_tarball: \"yes\"\n").is_err());
        assert!(from_textproto("repo: \"r\"\nfirmware: \"x\"\n").is_err());
    }

    #[test]
    fn rejects_unterminated_input() {
        assert!(from_textproto("repo: \"r\"\nfirmware {\n build_arg: \"x\"\n").is_err());
        assert!(from_textproto("repo: \"abc\n").is_err());
    }

    #[test]
    fn missing_repo_is_reported() {
        let err = from_textproto("tarball: \"t\"\n").unwrap_err();
        assert!(matches!(err, TextprotoError::MissingField("repo")));
        let err = from_textproto("repo: \"r\"\nartifact { name: \"x\" }\n").unwrap_err();
        assert!(matches!(err, TextprotoError::MissingField("built_path")));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let err = from_textproto(&"a {".repeat(200_000)).unwrap_err();
        assert!(matches!(
            err,
            TextprotoError::TooDeep {
                line: 1,
                limit: MAX_NESTING
            }
        ));
        let angled = format!("repo: \"r\"\n{}", "x <".repeat(MAX_NESTING + 1));
        assert!(matches!(
            from_textproto(&angled).unwrap_err(),
            TextprotoError::TooDeep { line: 2, .. }
        ));
    }

    #[test]
    fn braces_in_strings_and_comments_do_not_count() {
        let input = format!(
            "repo: \"{}\"\n# {}\ntarball: 't{}'\n",
            "{".repeat(100),
            "<".repeat(100),
            "{".repeat(100)
        );
        let c = from_textproto(&input).unwrap();
        assert_eq!(c.repo.len(), 100);
    }
}
