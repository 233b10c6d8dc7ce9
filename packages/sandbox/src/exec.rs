// ABOUTME: Shell executor running argument-vector commands with timeouts and output caps
// ABOUTME: Spawn failures, non-zero exits and timeouts are reported in the output, never as errors

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to wait for output readers after the child has been reaped or killed
const READER_GRACE: Duration = Duration::from_secs(2);

/// A command to execute: program plus explicit arguments, never a shell string
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Full argument vector including the program
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    /// Terminated by a signal without an exit code
    Signaled,
    TimedOut,
    SpawnFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit: ExitStatus,
    /// Output beyond the configured cap was discarded
    pub truncated: bool,
}

impl CommandOutput {
    pub fn new(exit: ExitStatus, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit,
            truncated: false,
        }
    }

    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(ExitStatus::SpawnFailed(reason.clone()), Vec::new(), reason)
    }

    pub fn success(&self) -> bool {
        self.exit == ExitStatus::Code(0)
    }

    pub fn timed_out(&self) -> bool {
        self.exit == ExitStatus::TimedOut
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_trimmed(&self) -> String {
        self.stdout_lossy().trim().to_string()
    }

    /// Stdout followed by stderr, for build logs
    pub fn combined(&self) -> String {
        let stdout = self.stdout_lossy();
        let stderr = self.stderr_lossy();
        match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (true, _) => stderr,
            (_, true) => stdout,
            _ => format!("{}\n{}", stdout.trim_end(), stderr),
        }
    }

    /// Short human description of a failed run
    pub fn failure_summary(&self) -> String {
        match &self.exit {
            ExitStatus::Code(0) => "succeeded".to_string(),
            ExitStatus::Code(code) => {
                let stderr = self.stderr_lossy();
                let line = stderr.lines().rev().find(|l| !l.trim().is_empty());
                match line {
                    Some(line) => format!("exit code {}: {}", code, line.trim()),
                    None => format!("exit code {}", code),
                }
            }
            ExitStatus::Signaled => "terminated by signal".to_string(),
            ExitStatus::TimedOut => "timed out".to_string(),
            ExitStatus::SpawnFailed(reason) => format!("failed to start: {}", reason),
        }
    }
}

/// Runs external commands. Implementations must not fail; every outcome is a `CommandOutput`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: CommandSpec) -> CommandOutput;
}

/// Runs commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: CommandSpec) -> CommandOutput {
        debug!(command = %spec, timeout_secs = spec.timeout.as_secs(), "Running command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %spec.program, "Failed to spawn command: {}", e);
                return CommandOutput::spawn_failed(e.to_string());
            }
        };

        if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Child closed stdin early: {}", e);
                }
                if let Err(e) = stdin.shutdown().await {
                    debug!("Failed to close child stdin: {}", e);
                }
            });
        }

        let cap = spec.max_output_bytes;
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s, cap)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s, cap)));

        let exit = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) => match status.code() {
                Some(code) => ExitStatus::Code(code),
                None => ExitStatus::Signaled,
            },
            Ok(Err(e)) => ExitStatus::SpawnFailed(e.to_string()),
            Err(_) => {
                warn!(command = %spec, "Command timed out after {:?}, killing", spec.timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command: {}", e);
                }
                ExitStatus::TimedOut
            }
        };

        let (stdout, stdout_truncated) = collect(stdout_task).await;
        let (stderr, stderr_truncated) = collect(stderr_task).await;

        CommandOutput {
            stdout,
            stderr,
            exit,
            truncated: stdout_truncated || stderr_truncated,
        }
    }
}

/// Read a stream to EOF keeping at most `cap` bytes; the rest is drained and discarded
async fn read_capped<R>(mut reader: R, cap: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}

async fn collect(task: Option<JoinHandle<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => (Vec::new(), false),
        Err(_) => {
            // A grandchild may still hold the pipe open
            task.abort();
            (Vec::new(), true)
        }
    }
}
