use crate::exec::{CommandSpec, Executor, ProcessOutput};
use crate::RuntimeError;
use std::sync::{Mutex, PoisonError};

/// Scripted reply for one mocked command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockResponse {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl MockResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn ok_with_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn fail(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

type Handler = Box<dyn Fn(&CommandSpec) -> MockResponse + Send + Sync>;

/// Executor that never spawns anything.
///
/// Every call is recorded and answered by a handler closure. Handlers may
/// touch the filesystem, e.g. to create the tree a clone would produce.
pub struct MockExecutor {
    handler: Handler,
    calls: Mutex<Vec<CommandSpec>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new(|_| MockResponse::ok())
    }
}

impl MockExecutor {
    pub fn new(handler: impl Fn(&CommandSpec) -> MockResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded calls rendered as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

impl Executor for MockExecutor {
    fn execute(&self, cmd: &CommandSpec) -> Result<ProcessOutput, RuntimeError> {
        self.calls
            .lock()
            .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))?
            .push(cmd.clone());
        let resp = (self.handler)(cmd);
        let mut combined = resp.stdout.clone();
        combined.extend_from_slice(&resp.stderr);
        Ok(ProcessOutput {
            code: Some(resp.code),
            stdout: resp.stdout,
            combined,
        })
    }
}
