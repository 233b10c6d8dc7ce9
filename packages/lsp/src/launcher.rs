// ABOUTME: Starts a language server process inside a sandbox with piped stdio
// ABOUTME: The launcher trait lets sessions run against in-memory servers in tests

use async_trait::async_trait;
use sorobox_sandbox::{SandboxError, SandboxManager};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A running language server reachable over its stdio
pub struct LanguageServer {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<Child>,
}

impl LanguageServer {
    pub fn new(
        stdin: impl AsyncWrite + Send + Unpin + 'static,
        stdout: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            child: None,
        }
    }

    fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Split into stdio halves and a handle that terminates the process
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn AsyncWrite + Send + Unpin>,
        Box<dyn AsyncRead + Send + Unpin>,
        ProcessHandle,
    ) {
        (self.stdin, self.stdout, ProcessHandle { child: self.child })
    }
}

/// Owns the language server process; killing is idempotent
pub struct ProcessHandle {
    child: Option<Child>,
}

impl ProcessHandle {
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            match child.kill().await {
                Ok(()) => debug!(?pid, "Language server process terminated"),
                Err(e) => warn!(?pid, "Failed to terminate language server: {}", e),
            }
        }
    }
}

#[async_trait]
pub trait LanguageServerLauncher: Send + Sync {
    async fn launch(&self, container: &str, workdir: &str) -> Result<LanguageServer, SandboxError>;
}

/// Launches the configured binary through `docker exec -i`
pub struct DockerLauncher {
    manager: Arc<SandboxManager>,
    binary: String,
}

impl DockerLauncher {
    pub fn new(manager: Arc<SandboxManager>, binary: impl Into<String>) -> Self {
        Self {
            manager,
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl LanguageServerLauncher for DockerLauncher {
    async fn launch(&self, container: &str, workdir: &str) -> Result<LanguageServer, SandboxError> {
        let docker = self.manager.docker();
        let args = docker.interactive_exec_args(container, workdir, &self.binary);

        let mut child = Command::new(docker.bin())
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::SubprocessSpawnFailed(format!("{}: {}", docker.bin(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::SubprocessSpawnFailed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::SubprocessSpawnFailed("stdout not captured".to_string()))?;

        info!(container, workdir, pid = ?child.id(), binary = %self.binary, "Language server started");
        Ok(LanguageServer::new(stdin, stdout).with_child(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorobox_config::Settings;
    use sorobox_sandbox::test_utils::ScriptedRunner;
    use sorobox_sandbox::EventBus;

    #[tokio::test]
    async fn test_missing_docker_binary_is_spawn_failure() {
        let mut settings = Settings::default().sandbox;
        settings.docker_bin = "/nonexistent/docker-binary".to_string();
        let manager = Arc::new(SandboxManager::new(
            Arc::new(ScriptedRunner::new()),
            settings,
            "stellar",
            EventBus::default(),
        ));

        let result = DockerLauncher::new(manager, "rust-analyzer")
            .launch("useralice", "/home/developer/workspace")
            .await;
        assert!(matches!(result, Err(SandboxError::SubprocessSpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_kill_without_child_is_noop() {
        let (client, _server) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(client);
        let (_stdin, _stdout, mut handle) = LanguageServer::new(write, read).into_parts();
        handle.kill().await;
        handle.kill().await;
    }
}
