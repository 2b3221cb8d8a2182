use crate::RuntimeError;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A program invocation: argv plus working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// `program` followed by the arguments, as one vector.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    /// Stdout and stderr interleaved in arrival order.
    pub combined: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn status_string(&self) -> String {
        match self.code {
            Some(c) => format!("exit status {c}"),
            None => "terminated by signal".to_owned(),
        }
    }
}

/// Something that can run a [`CommandSpec`] to completion.
pub trait Executor: Send + Sync {
    fn execute(&self, cmd: &CommandSpec) -> Result<ProcessOutput, RuntimeError>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, cmd: &CommandSpec) -> Result<ProcessOutput, RuntimeError> {
        (**self).execute(cmd)
    }
}

/// Shared cancellation flag, set from the signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs real child processes, killing them when the token is cancelled.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    cancel: CancelToken,
    drain_grace: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(CancelToken::default())
    }
}

impl ProcessExecutor {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            drain_grace: DRAIN_GRACE,
        }
    }

    /// How long to keep reading output once the child has exited.
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

/// Bytes collected from a child's pipes.
#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    combined: Vec<u8>,
}

fn pump(mut src: impl Read, captured: &Mutex<Captured>, is_stdout: bool) {
    let mut buf = [0u8; 8192];
    loop {
        match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let mut c = captured.lock().unwrap_or_else(PoisonError::into_inner);
                if is_stdout {
                    c.stdout.extend_from_slice(&buf[..n]);
                }
                c.combined.extend_from_slice(&buf[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
}

/// Wait for the pipe readers after the child has exited.
///
/// A background grandchild can inherit the pipes and keep them open long
/// after the child is gone; readers still running after `grace` are left
/// detached and whatever they collected so far is used.
fn drain(pumps: Vec<JoinHandle<()>>, grace: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + grace;
    while !pumps.iter().all(JoinHandle::is_finished) {
        if cancel.is_cancelled() || Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    for h in pumps {
        let _ = h.join();
    }
    true
}

impl Executor for ProcessExecutor {
    fn execute(&self, cmd: &CommandSpec) -> Result<ProcessOutput, RuntimeError> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
            program: cmd.program.clone(),
            source,
        })?;

        let captured = Arc::new(Mutex::new(Captured::default()));
        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            let captured = Arc::clone(&captured);
            pumps.push(thread::spawn(move || pump(out, &captured, true)));
        }
        if let Some(err) = child.stderr.take() {
            let captured = Arc::clone(&captured);
            pumps.push(thread::spawn(move || pump(err, &captured, false)));
        }

        let status = loop {
            if self.cancel.is_cancelled() {
                debug!("killing {}", cmd.program);
                let _ = child.kill();
                let _ = child.wait();
                return Err(RuntimeError::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        if !drain(pumps, self.drain_grace, &self.cancel) {
            if self.cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            warn!("{} exited but its output pipes are still open", cmd.program);
        }
        let Captured { stdout, combined } =
            std::mem::take(&mut *captured.lock().unwrap_or_else(PoisonError::into_inner));

        Ok(ProcessOutput {
            code: status.code(),
            stdout,
            combined,
        })
    }
}

/// Run `cmd`, treating a non-zero exit as an error.
///
/// The error keeps the captured output so the caller can show the user what
/// the tool printed.
pub fn run_command(exec: &dyn Executor, cmd: &CommandSpec) -> Result<ProcessOutput, RuntimeError> {
    debug!("running {cmd}");
    let out = exec.execute(cmd)?;
    if !out.success() {
        return Err(RuntimeError::CommandFailed {
            command: cmd.to_string(),
            status: out.status_string(),
            output: out.combined,
        });
    }
    Ok(out)
}
