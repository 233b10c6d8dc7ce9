// ABOUTME: Docker CLI wrapper for sandbox container lifecycle and in-container command execution
// ABOUTME: Builds docker argument vectors and runs them through a CommandRunner

use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const MANAGED_LABEL: &str = "sorobox.managed";
pub const USER_LABEL: &str = "sorobox.user";

/// Options for `docker run -d`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub command: Vec<String>,
}

/// A command to run inside a container with `docker exec`
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub container: String,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub command: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub max_output_bytes: Option<usize>,
}

impl ExecRequest {
    pub fn new<I, S>(container: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container: container.into(),
            user: None,
            workdir: None,
            command: command.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: crate::exec::DEFAULT_TIMEOUT,
            max_output_bytes: None,
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
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
        self.max_output_bytes = Some(max);
        self
    }
}

#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    bin: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>, bin: impl Into<String>) -> Self {
        Self {
            runner,
            bin: bin.into(),
        }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.bin)
    }

    /// Whether a container with this name exists in any state
    pub async fn container_exists(&self, name: &str) -> bool {
        let output = self
            .runner
            .run(self.command().args(["inspect", "-f", "{{.Name}}", name]))
            .await;
        output.success()
    }

    /// Whether the container exists and reports State.Running=true
    pub async fn is_running(&self, name: &str) -> bool {
        let output = self
            .runner
            .run(
                self.command()
                    .args(["inspect", "-f", "{{.State.Running}}", name]),
            )
            .await;
        output.success() && output.stdout_trimmed() == "true"
    }

    pub async fn run_detached(&self, options: &RunOptions) -> CommandOutput {
        let mut spec = self
            .command()
            .args(["run", "-d", "--name", options.name.as_str()]);
        for (key, value) in &options.labels {
            spec = spec.arg("--label").arg(format!("{}={}", key, value));
        }
        for (key, value) in &options.env {
            spec = spec.arg("-e").arg(format!("{}={}", key, value));
        }
        spec = spec.arg(options.image.as_str()).args(options.command.iter().cloned());
        debug!(container = %options.name, "Starting container");
        self.runner.run(spec).await
    }

    pub async fn stop(&self, name: &str, timeout: Duration) -> CommandOutput {
        let grace = timeout.as_secs().to_string();
        self.runner
            .run(
                self.command()
                    .args(["stop", "-t", grace.as_str(), name])
                    // docker waits `grace` seconds before SIGKILL
                    .timeout(timeout + Duration::from_secs(5)),
            )
            .await
    }

    pub async fn remove_force(&self, name: &str) -> CommandOutput {
        self.runner
            .run(self.command().args(["rm", "-f", name]))
            .await
    }

    pub async fn exec(&self, request: ExecRequest) -> CommandOutput {
        let mut spec = self.command().arg("exec");
        if request.stdin.is_some() {
            spec = spec.arg("-i");
        }
        if let Some(user) = &request.user {
            spec = spec.args(["-u", user.as_str()]);
        }
        if let Some(workdir) = &request.workdir {
            spec = spec.args(["-w", workdir.as_str()]);
        }
        spec = spec
            .arg(request.container.as_str())
            .args(request.command.iter().cloned())
            .timeout(request.timeout);
        if let Some(input) = request.stdin {
            spec = spec.stdin(input);
        }
        if let Some(max) = request.max_output_bytes {
            spec = spec.max_output_bytes(max);
        }
        self.runner.run(spec).await
    }

    /// Names of running containers matching every `label=value` filter
    pub async fn list_running(&self, label_filters: &[String]) -> Vec<String> {
        let mut spec = self.command().arg("ps");
        for filter in label_filters {
            spec = spec.arg("--filter").arg(format!("label={}", filter));
        }
        let output = self.runner.run(spec.args(["--format", "{{.Names}}"])).await;
        if !output.success() {
            debug!("docker ps failed: {}", output.failure_summary());
            return Vec::new();
        }
        output
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Argument vector for an interactive `docker exec -i` with piped stdio
    pub fn interactive_exec_args(&self, container: &str, workdir: &str, program: &str) -> Vec<String> {
        vec![
            "exec".to_string(),
            "-i".to_string(),
            "-w".to_string(),
            workdir.to_string(),
            container.to_string(),
            program.to_string(),
        ]
    }
}

/// Whether docker reported that the named container does not exist
pub fn is_no_such_container(output: &CommandOutput) -> bool {
    output
        .stderr_lossy()
        .to_ascii_lowercase()
        .contains("no such container")
}
