// ABOUTME: Resolves which sandbox container a language server session should run in
// ABOUTME: Sessions bind to the requesting user's sandbox; first-match discovery is opt-in

use sorobox_config::LspSettings;
use sorobox_sandbox::{paths, SandboxError, SandboxManager};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a session's language server will run
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTarget {
    pub container: String,
    /// Working directory for the language server inside the container
    pub workdir: String,
}

pub struct Discovery {
    manager: Arc<SandboxManager>,
    settings: LspSettings,
}

impl Discovery {
    pub fn new(manager: Arc<SandboxManager>, settings: LspSettings) -> Self {
        Self { manager, settings }
    }

    pub fn settings(&self) -> &LspSettings {
        &self.settings
    }

    pub fn manager(&self) -> &Arc<SandboxManager> {
        &self.manager
    }

    /// Pick the container and working directory for a new session
    pub async fn resolve(
        &self,
        user_id: Option<&str>,
        project: Option<&str>,
    ) -> Result<SessionTarget, SandboxError> {
        let workdir = self.workdir(project)?;
        let container = match user_id.map(str::trim).filter(|u| !u.is_empty()) {
            Some(user_id) => self.bound(user_id).await?,
            None if self.settings.allow_discovery => self.first_match().await?,
            None => {
                return Err(SandboxError::BridgeDiscoveryFailed(
                    "userId is required".to_string(),
                ))
            }
        };
        Ok(SessionTarget { container, workdir })
    }

    fn workdir(&self, project: Option<&str>) -> Result<String, SandboxError> {
        let root = self.settings.workdir.trim_end_matches('/');
        match project.map(str::trim).filter(|p| !p.is_empty()) {
            None => Ok(root.to_string()),
            Some(project) if paths::is_safe_name(project) => Ok(format!("{}/{}", root, project)),
            Some(project) => Err(SandboxError::InvalidProjectName(project.to_string())),
        }
    }

    async fn bound(&self, user_id: &str) -> Result<String, SandboxError> {
        let container = self.manager.ensure_running(user_id).await.map_err(|e| match e {
            SandboxError::ContainerUnavailable(name) => {
                SandboxError::BridgeDiscoveryFailed(format!("sandbox {} is not running", name))
            }
            other => other,
        })?;
        if !self.has_language_server(&container).await {
            return Err(SandboxError::BridgeDiscoveryFailed(format!(
                "{} not found in {}",
                self.settings.binary, container
            )));
        }
        info!(user_id, container = %container, "Language server session bound to user sandbox");
        Ok(container)
    }

    async fn first_match(&self) -> Result<String, SandboxError> {
        let candidates = self.manager.list_managed().await;
        debug!(count = candidates.len(), "Discovering sandbox for language server");
        for container in candidates {
            if self.has_language_server(&container).await {
                warn!(container = %container, "Language server session attached by discovery");
                return Ok(container);
            }
        }
        Err(SandboxError::BridgeDiscoveryFailed(
            "no running sandbox with a language server".to_string(),
        ))
    }

    async fn has_language_server(&self, container: &str) -> bool {
        self.manager
            .exec(
                self.manager
                    .exec_request(container, ["which", self.settings.binary.as_str()]),
            )
            .await
            .success()
    }
}
