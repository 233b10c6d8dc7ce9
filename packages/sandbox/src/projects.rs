// ABOUTME: Project store deriving project metadata from the sandbox workspace directory listing
// ABOUTME: Projects are created with `stellar contract init`, removed with rm -rf and renamed with mv

use crate::error::{Result, SandboxError};
use crate::files::validate_project_name;
use crate::manager::SandboxManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_DESCRIPTION: &str = "Soroban contract project";
pub const CONTRACT_TYPE: &str = "soroban";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub contract_type: String,
}

impl Project {
    fn new(name: &str, created_at: DateTime<Utc>, description: Option<&str>) -> Self {
        Self {
            id: format!("project_{}", name),
            name: name.to_string(),
            created_at,
            description: description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(DEFAULT_DESCRIPTION)
                .to_string(),
            contract_type: CONTRACT_TYPE.to_string(),
        }
    }
}

pub struct ProjectStore {
    manager: Arc<SandboxManager>,
}

impl ProjectStore {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }

    fn project_dir(&self, name: &str) -> String {
        format!("{}/{}", self.manager.workspace_root(), name)
    }

    async fn exists(&self, container: &str, name: &str) -> bool {
        let dir = self.project_dir(name);
        self.manager
            .exec(self.manager.exec_request(container, ["test", "-d", dir.as_str()]))
            .await
            .success()
    }

    /// Projects in the user's workspace, sorted by name
    pub async fn list(&self, user_id: &str) -> Result<Vec<Project>> {
        let container = self.manager.ensure_running(user_id).await?;
        let root = self.manager.workspace_root();
        let output = self
            .manager
            .exec(self.manager.exec_request(
                &container,
                [
                    "find", root, "-mindepth", "1", "-maxdepth", "1", "-type", "d", "-exec",
                    "stat", "-c", "%n|%Y", "{}", "+",
                ],
            ))
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed("failed to list projects", &output));
        }

        let prefix = format!("{}/", root);
        let mut projects: Vec<Project> = output
            .stdout_lossy()
            .lines()
            .filter_map(|line| {
                let (path, mtime) = line.trim().rsplit_once('|')?;
                let name = path.strip_prefix(&prefix)?;
                if name.is_empty() || name.starts_with('.') || name.contains('/') {
                    return None;
                }
                let created_at = mtime
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .unwrap_or_else(Utc::now);
                Some(Project::new(name, created_at, None))
            })
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    pub async fn get(&self, user_id: &str, name: &str) -> Result<Project> {
        let name = validate_project_name(name)?;
        self.list(user_id)
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| SandboxError::ProjectNotFound(name.to_string()))
    }

    pub async fn create(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let name = validate_project_name(name)?;
        let container = self.manager.ensure_running(user_id).await?;
        if self.exists(&container, name).await {
            return Err(SandboxError::ProjectExists(name.to_string()));
        }

        let output = self
            .manager
            .exec(
                self.manager
                    .exec_request(
                        &container,
                        [self.manager.stellar_bin(), "contract", "init", name],
                    )
                    .timeout(self.manager.settings().init_timeout),
            )
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed(
                format!("failed to initialize project {}", name),
                &output,
            ));
        }

        info!(user_id, project = name, "Created project");
        self.manager
            .events()
            .info(user_id, format!("Created project {}", name));
        Ok(Project::new(name, Utc::now(), description))
    }

    pub async fn delete(&self, user_id: &str, name: &str) -> Result<()> {
        let name = validate_project_name(name)?;
        let container = self.manager.ensure_running(user_id).await?;
        if !self.exists(&container, name).await {
            return Err(SandboxError::ProjectNotFound(name.to_string()));
        }

        let dir = self.project_dir(name);
        let output = self
            .manager
            .exec(self.manager.exec_request(&container, ["rm", "-rf", dir.as_str()]))
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed(
                format!("failed to delete project {}", name),
                &output,
            ));
        }
        info!(user_id, project = name, "Deleted project");
        Ok(())
    }

    pub async fn rename(&self, user_id: &str, old_name: &str, new_name: &str) -> Result<Project> {
        let old_name = validate_project_name(old_name)?;
        let new_name = validate_project_name(new_name)?;
        let container = self.manager.ensure_running(user_id).await?;
        if !self.exists(&container, old_name).await {
            return Err(SandboxError::ProjectNotFound(old_name.to_string()));
        }
        if self.exists(&container, new_name).await {
            return Err(SandboxError::ProjectExists(new_name.to_string()));
        }

        let from = self.project_dir(old_name);
        let to = self.project_dir(new_name);
        let output = self
            .manager
            .exec(
                self.manager
                    .exec_request(&container, ["mv", "--", from.as_str(), to.as_str()]),
            )
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed(
                format!("failed to rename project {} to {}", old_name, new_name),
                &output,
            ));
        }
        info!(user_id, from = old_name, to = new_name, "Renamed project");
        self.get(user_id, new_name).await
    }
}
