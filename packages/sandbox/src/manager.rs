// ABOUTME: Sandbox manager owning the lifecycle of one Docker container per user
// ABOUTME: Create and delete are serialized per user; different users never contend

use crate::docker::{is_no_such_container, DockerCli, ExecRequest, RunOptions, MANAGED_LABEL, USER_LABEL};
use crate::error::{Diagnostics, Result, SandboxError};
use crate::events::EventBus;
use crate::exec::{CommandOutput, CommandRunner};
use crate::paths;
use crate::poll::{poll_until, PollOutcome, PollPolicy, Probe};
use serde::Serialize;
use sorobox_config::SandboxSettings;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Absent,
    /// A create or delete for this user is in progress
    Creating,
    Running,
    /// Container exists but is not running
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSandbox {
    pub container_name: String,
    pub message: String,
}

pub struct SandboxManager {
    docker: DockerCli,
    settings: SandboxSettings,
    stellar_bin: String,
    events: EventBus,
    user_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SandboxManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: SandboxSettings,
        stellar_bin: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            docker: DockerCli::new(runner, settings.docker_bin.clone()),
            settings,
            stellar_bin: stellar_bin.into(),
            events,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn docker(&self) -> &DockerCli {
        &self.docker
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn stellar_bin(&self) -> &str {
        &self.stellar_bin
    }

    pub fn workspace_root(&self) -> &str {
        self.settings.workspace_root.trim_end_matches('/')
    }

    /// Deterministic container name for a user
    pub fn container_name(&self, user_id: &str) -> Result<String> {
        if !paths::is_safe_name(user_id) {
            return Err(SandboxError::InvalidUserId(user_id.to_string()));
        }
        Ok(format!("{}{}", self.settings.container_prefix, user_id))
    }

    /// Exec request running as the sandbox user inside the workspace root
    pub fn exec_request<I, S>(&self, container: &str, command: I) -> ExecRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecRequest::new(container, command)
            .user(self.settings.container_user.as_str())
            .workdir(self.workspace_root())
            .timeout(self.settings.command_timeout)
    }

    pub async fn exec(&self, request: ExecRequest) -> CommandOutput {
        self.docker.exec(request).await
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.user_locks.lock().unwrap_or_else(|poisoned| {
            warn!("Sandbox lock map mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Serialize lifecycle changes for one user. The map entry goes away with its last holder.
    async fn lock_user(&self, user_id: &str) -> UserLockGuard<'_> {
        let lock = self
            .locks()
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        UserLockGuard {
            manager: self,
            user_id: user_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.locks().len()
    }

    fn startup_policy(&self) -> PollPolicy {
        PollPolicy::new(self.settings.startup_interval, self.settings.startup_attempts)
    }

    /// Create (or recreate) the user's sandbox and initialize the default project.
    pub async fn create(&self, user_id: &str) -> Result<CreatedSandbox> {
        let name = self.container_name(user_id)?;
        let _guard = self.lock_user(user_id).await;

        info!(user_id, container = %name, "Creating sandbox");
        self.events.info(user_id, format!("Creating sandbox {}", name));

        if self.docker.container_exists(&name).await {
            self.events
                .info(user_id, "Existing sandbox found, replacing it");
            self.remove_container(user_id, &name).await?;
            let gone = poll_until(
                self.startup_policy(),
                |_| {
                    let name = name.as_str();
                    async move {
                        if self.docker.container_exists(name).await {
                            Probe::Pending
                        } else {
                            Probe::Ready(())
                        }
                    }
                },
                |_| {},
            )
            .await;
            if gone.into_value().is_none() {
                return Err(SandboxError::ContainerCreationFailed {
                    message: format!("previous container {} could not be removed", name),
                    diagnostics: Diagnostics::default(),
                });
            }
        }

        let mut options = RunOptions {
            name: name.clone(),
            image: self.settings.image.clone(),
            command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            ..Default::default()
        };
        options.labels.insert(MANAGED_LABEL.into(), "true".into());
        options.labels.insert(USER_LABEL.into(), user_id.into());
        options
            .env
            .insert("STELLAR_HOME".into(), self.settings.credential_home.clone());

        let run = self.docker.run_detached(&options).await;
        if !run.success() {
            self.events
                .error(user_id, format!("Container launch failed: {}", run.failure_summary()));
            return Err(SandboxError::ContainerCreationFailed {
                message: format!("docker run failed: {}", run.failure_summary()),
                diagnostics: (&run).into(),
            });
        }

        let running = poll_until(
            self.startup_policy(),
            |attempt| {
                let name = name.as_str();
                async move {
                    debug!(container = name, attempt, "Checking container state");
                    if self.docker.is_running(name).await {
                        Probe::Ready(())
                    } else {
                        Probe::Pending
                    }
                }
            },
            |_| {},
        )
        .await;
        if let PollOutcome::Exhausted { attempts } = running {
            return Err(SandboxError::ContainerCreationFailed {
                message: format!("container {} not running after {} checks", name, attempts),
                diagnostics: (&run).into(),
            });
        }

        self.init_default_project(user_id, &name).await?;

        let message = format!(
            "Sandbox {} is running with project {}",
            name, self.settings.default_project
        );
        self.events.info(user_id, message.clone());
        Ok(CreatedSandbox {
            container_name: name,
            message,
        })
    }

    async fn init_default_project(&self, user_id: &str, name: &str) -> Result<()> {
        let project = self.settings.default_project.as_str();
        let init = self
            .exec(
                self.exec_request(name, [self.stellar_bin.as_str(), "contract", "init", project])
                    .timeout(self.settings.init_timeout),
            )
            .await;

        if !init.success() {
            if init.combined().contains("already exists") {
                debug!(container = name, project, "Default project already present");
            } else {
                return Err(SandboxError::ContainerCreationFailed {
                    message: format!("project initialization failed: {}", init.failure_summary()),
                    diagnostics: (&init).into(),
                });
            }
        }

        let project_dir = format!("{}/{}", self.workspace_root(), project);
        let verify = self
            .exec(self.exec_request(name, ["test", "-d", project_dir.as_str()]))
            .await;
        if !verify.success() {
            return Err(SandboxError::ContainerCreationFailed {
                message: format!("project directory {} missing after init", project_dir),
                diagnostics: (&init).into(),
            });
        }
        self.events
            .info(user_id, format!("Initialized project {}", project));
        Ok(())
    }

    /// Stop and remove the user's sandbox. A missing container is success.
    pub async fn delete(&self, user_id: &str) -> Result<()> {
        let name = self.container_name(user_id)?;
        let _guard = self.lock_user(user_id).await;

        info!(user_id, container = %name, "Deleting sandbox");
        self.remove_container(user_id, &name).await?;
        self.events.info(user_id, format!("Sandbox {} deleted", name));
        Ok(())
    }

    async fn remove_container(&self, user_id: &str, name: &str) -> Result<()> {
        let stop = self.docker.stop(name, self.settings.stop_timeout).await;
        if !stop.success() && !is_no_such_container(&stop) {
            self.events.warn(
                user_id,
                format!("Stopping {} failed, forcing removal: {}", name, stop.failure_summary()),
            );
        }

        let remove = self.docker.remove_force(name).await;
        if remove.success() || is_no_such_container(&remove) {
            return Ok(());
        }
        Err(SandboxError::command_failed(
            format!("failed to remove container {}", name),
            &remove,
        ))
    }

    /// True only when the container exists and is running
    pub async fn check_health(&self, user_id: &str) -> bool {
        match self.container_name(user_id) {
            Ok(name) => self.docker.is_running(&name).await,
            Err(_) => false,
        }
    }

    /// Container name of a running sandbox, or `ContainerUnavailable`
    pub async fn ensure_running(&self, user_id: &str) -> Result<String> {
        let name = self.container_name(user_id)?;
        if self.docker.is_running(&name).await {
            Ok(name)
        } else {
            Err(SandboxError::ContainerUnavailable(name))
        }
    }

    pub async fn status(&self, user_id: &str) -> Result<SandboxStatus> {
        let name = self.container_name(user_id)?;
        let busy = self
            .locks()
            .get(user_id)
            .is_some_and(|lock| lock.try_lock().is_err());
        if busy {
            return Ok(SandboxStatus::Creating);
        }
        if self.docker.is_running(&name).await {
            Ok(SandboxStatus::Running)
        } else if self.docker.container_exists(&name).await {
            Ok(SandboxStatus::Unhealthy)
        } else {
            Ok(SandboxStatus::Absent)
        }
    }

    /// Running containers created by this system
    pub async fn list_managed(&self) -> Vec<String> {
        self.docker
            .list_running(&[format!("{}=true", MANAGED_LABEL)])
            .await
    }
}

struct UserLockGuard<'a> {
    manager: &'a SandboxManager,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.manager.locks();
        // Waiters hold their own clone, so a count of one means nobody else wants it
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}
