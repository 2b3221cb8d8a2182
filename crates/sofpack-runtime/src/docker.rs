use crate::exec::{run_command, CommandSpec, Executor};
use crate::RuntimeError;
use serde::Deserialize;
use sofpack_schema::ImageRef;
use thiserror::Error;
use tracing::info;

/// Local name the pinned image is retagged to; the SOF wrapper script runs it.
pub const LOCAL_IMAGE_TAG: &str = "thesofproject/sof";

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("malformed inspect output: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected 1 image record, got {0}")]
    RecordCount(usize),
    #[error("image has no RepoDigests entry")]
    MissingDigest,
    #[error("image has {0} RepoDigests entries, cannot pick one")]
    AmbiguousDigest(usize),
    #[error("RepoDigests entry {0:?} is not a content digest")]
    NotADigest(String),
    #[error("inspect command failed: {0}")]
    Command(Box<RuntimeError>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    #[serde(default)]
    repo_digests: Option<Vec<String>>,
}

/// Extract the single `repo@sha256:...` reference from `docker image inspect`.
pub fn parse_repo_digest(stdout: &[u8]) -> Result<String, InspectError> {
    let records: Vec<InspectRecord> = serde_json::from_slice(stdout)?;
    let [record] = records.as_slice() else {
        return Err(InspectError::RecordCount(records.len()));
    };
    match record.repo_digests.as_deref().unwrap_or_default() {
        [] => Err(InspectError::MissingDigest),
        [digest] if ImageRef::from(digest.as_str()).is_digest() => Ok(digest.clone()),
        [other] => Err(InspectError::NotADigest(other.clone())),
        many => Err(InspectError::AmbiguousDigest(many.len())),
    }
}

/// Pull `reference`, resolve its content digest and retag it as `local_tag`.
///
/// Returns the digest reference that replaces the mutable one in the config.
pub fn pin_image(
    exec: &dyn Executor,
    docker: &str,
    reference: &str,
    local_tag: &str,
) -> Result<ImageRef, RuntimeError> {
    info!("pulling {reference}");
    run_command(exec, &CommandSpec::new(docker).args(["pull", reference])).map_err(|e| {
        RuntimeError::ContainerPull {
            reference: reference.to_owned(),
            source: Box::new(e),
        }
    })?;

    let digest_err = |source| RuntimeError::ContainerDigest {
        reference: reference.to_owned(),
        source,
    };
    let inspect = CommandSpec::new(docker).args(["image", "inspect", reference]);
    let out = match run_command(exec, &inspect) {
        Ok(out) => out,
        Err(RuntimeError::Cancelled) => return Err(RuntimeError::Cancelled),
        Err(e) => return Err(digest_err(InspectError::Command(Box::new(e)))),
    };
    let digest = parse_repo_digest(&out.stdout).map_err(digest_err)?;

    run_command(exec, &CommandSpec::new(docker).args(["tag", digest.as_str(), local_tag])).map_err(
        |e| RuntimeError::ContainerTag {
            digest: digest.clone(),
            source: Box::new(e),
        },
    )?;

    info!("pinned {reference} to {digest}");
    Ok(ImageRef::new(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockExecutor, MockResponse};

    const DIGEST: &str = "thesofproject/sof@sha256:4f1e5e6bd4a4c1f5b0c8d8b1a7fe33c8b95f0bd83b0d1e8e7d4c2a3b1f0e9d8c";

    fn inspect_json(digests: &[&str]) -> String {
        serde_json::json!([{ "Id": "sha256:abc", "RepoDigests": digests }]).to_string()
    }

    #[test]
    fn single_digest_is_accepted() {
        assert_eq!(parse_repo_digest(inspect_json(&[DIGEST]).as_bytes()).unwrap(), DIGEST);
    }

    #[test]
    fn zero_digests_is_missing() {
        let err = parse_repo_digest(inspect_json(&[]).as_bytes()).unwrap_err();
        assert!(matches!(err, InspectError::MissingDigest));
        let err = parse_repo_digest(br#"[{"Id": "x", "RepoDigests": null}]"#).unwrap_err();
        assert!(matches!(err, InspectError::MissingDigest));
    }

    #[test]
    fn several_digests_are_ambiguous() {
        let err = parse_repo_digest(inspect_json(&[DIGEST, "other@sha256:00"]).as_bytes())
            .unwrap_err();
        assert!(matches!(err, InspectError::AmbiguousDigest(2)));
    }

    #[test]
    fn record_count_must_be_one() {
        assert!(matches!(
            parse_repo_digest(b"[]").unwrap_err(),
            InspectError::RecordCount(0)
        ));
        let two = format!(
            "[{0},{0}]",
            serde_json::json!({ "RepoDigests": [DIGEST] })
        );
        assert!(matches!(
            parse_repo_digest(two.as_bytes()).unwrap_err(),
            InspectError::RecordCount(2)
        ));
    }

    #[test]
    fn malformed_json_is_error() {
        assert!(matches!(
            parse_repo_digest(b"not json").unwrap_err(),
            InspectError::Malformed(_)
        ));
    }

    #[test]
    fn tag_in_repo_digests_is_refused() {
        let err = parse_repo_digest(inspect_json(&["thesofproject/sof:latest"]).as_bytes()).unwrap_err();
        assert!(matches!(err, InspectError::NotADigest(ref r) if r == "thesofproject/sof:latest"));
    }

    #[test]
    fn pin_runs_pull_inspect_tag() {
        let json = inspect_json(&[DIGEST]);
        let mock = MockExecutor::new(move |cmd| match cmd.args.first().map(String::as_str) {
            Some("image") => MockResponse::ok_with_stdout(json.clone()),
            _ => MockResponse::ok(),
        });
        let image = pin_image(&mock, "docker", "thesofproject/sof:latest", LOCAL_IMAGE_TAG).unwrap();
        assert_eq!(image, DIGEST);
        assert!(image.is_digest());
        assert_eq!(
            mock.command_lines(),
            vec![
                "docker pull thesofproject/sof:latest".to_owned(),
                "docker image inspect thesofproject/sof:latest".to_owned(),
                format!("docker tag {DIGEST} thesofproject/sof"),
            ]
        );
    }

    #[test]
    fn pull_failure_stops_before_inspect() {
        let mock = MockExecutor::new(|_| MockResponse::fail(1, "no such image"));
        let err = pin_image(&mock, "docker", "bogus:tag", LOCAL_IMAGE_TAG).unwrap_err();
        assert!(matches!(err, RuntimeError::ContainerPull { .. }));
        assert_eq!(mock.calls().len(), 1);
    }

    #[test]
    fn ambiguous_digest_stops_before_tag() {
        let json = inspect_json(&[DIGEST, "mirror/sof@sha256:11"]);
        let mock = MockExecutor::new(move |cmd| match cmd.args.first().map(String::as_str) {
            Some("image") => MockResponse::ok_with_stdout(json.clone()),
            _ => MockResponse::ok(),
        });
        let err = pin_image(&mock, "docker", "sof:latest", LOCAL_IMAGE_TAG).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ContainerDigest {
                source: InspectError::AmbiguousDigest(2),
                ..
            }
        ));
        assert_eq!(mock.calls().len(), 2);
    }

    #[test]
    fn tag_failure_is_reported() {
        let json = inspect_json(&[DIGEST]);
        let mock = MockExecutor::new(move |cmd| match cmd.args.first().map(String::as_str) {
            Some("image") => MockResponse::ok_with_stdout(json.clone()),
            Some("tag") => MockResponse::fail(1, "denied"),
            _ => MockResponse::ok(),
        });
        let err = pin_image(&mock, "docker", "sof:latest", LOCAL_IMAGE_TAG).unwrap_err();
        assert!(matches!(err, RuntimeError::ContainerTag { .. }));
    }
}
