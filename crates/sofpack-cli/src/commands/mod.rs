pub mod build;

use indicatif::{ProgressBar, ProgressStyle};
use sofpack_core::CoreError;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_INTEGRITY_FAILURE: u8 = 3;

/// A command failure: the message for stderr and the process exit code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
    /// Output of the external tool that failed, shown ahead of the message.
    pub tool_output: Option<Vec<u8>>,
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = if e.is_config_error() {
            EXIT_CONFIG_ERROR
        } else if e.is_integrity_failure() {
            EXIT_INTEGRITY_FAILURE
        } else {
            EXIT_FAILURE
        };
        Self {
            code,
            message: e.to_string(),
            tool_output: e.tool_output().map(<[u8]>::to_vec),
        }
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self {
            code: EXIT_FAILURE,
            message,
            tool_output: None,
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofpack_core::Stage;
    use sofpack_runtime::RuntimeError;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"commit": "abc"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"commit\""));
        assert!(result.contains("\"abc\""));
    }

    #[test]
    fn runtime_failure_maps_to_generic_exit() {
        let e = CoreError::Stage {
            stage: Stage::BuildFirmware,
            source: Box::new(RuntimeError::Cancelled.into()),
        };
        let f = Failure::from(e);
        assert_eq!(f.code, EXIT_FAILURE);
        assert_eq!(f.message, "build-firmware failed: interrupted");
    }

    #[test]
    fn failed_tool_output_is_kept_for_display() {
        let e = CoreError::Stage {
            stage: Stage::AcquireSource,
            source: Box::new(
                RuntimeError::Git {
                    action: "clone",
                    source: Box::new(RuntimeError::CommandFailed {
                        command: "git clone x".to_owned(),
                        status: "exit status 128".to_owned(),
                        output: b"fatal: repository not found\n".to_vec(),
                    }),
                }
                .into(),
            ),
        };
        let f = Failure::from(e);
        assert_eq!(f.code, EXIT_FAILURE);
        assert_eq!(f.tool_output.as_deref(), Some(&b"fatal: repository not found\n"[..]));
        assert!(!f.message.contains("repository not found"));
    }

    #[test]
    fn prerequisites_map_to_generic_exit() {
        let f = Failure::from(CoreError::Prerequisites("missing prerequisites".to_owned()));
        assert_eq!(f.code, EXIT_FAILURE);
    }

    #[test]
    fn string_failure_is_generic() {
        let f = Failure::from("boom".to_owned());
        assert_eq!(f.code, EXIT_FAILURE);
        assert_eq!(f.message, "boom");
        assert!(f.tool_output.is_none());
    }
}
