// ABOUTME: File gateway for project files inside a user's sandbox
// ABOUTME: Paths are sanitized and confined to the project root; payloads travel base64 over stdin

use crate::error::{Result, SandboxError};
use crate::manager::SandboxManager;
use crate::paths;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Directories never shown in listings
const EXCLUDED_DIRS: &[&str] = &["target", ".git"];
/// File names never shown in listings
const EXCLUDED_FILES: &[&str] = &["Cargo.lock", "projects.json"];

/// Decodes stdin into the file named by the first positional argument
const WRITE_SCRIPT: &str = "base64 -d > \"$1\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// Relative to the project root
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReport {
    pub bytes_written: usize,
    /// Size on disk matched the input length
    pub verified: bool,
}

/// A running sandbox and an existing project root inside it
#[derive(Debug, Clone)]
pub(crate) struct ProjectScope {
    pub container: String,
    pub root: String,
}

pub struct FileGateway {
    manager: Arc<SandboxManager>,
    max_file_bytes: usize,
}

impl FileGateway {
    pub fn new(manager: Arc<SandboxManager>, max_file_bytes: usize) -> Self {
        Self {
            manager,
            max_file_bytes,
        }
    }

    pub fn manager(&self) -> &Arc<SandboxManager> {
        &self.manager
    }

    pub(crate) async fn scope(&self, user_id: &str, project: &str) -> Result<ProjectScope> {
        let project = validate_project_name(project)?;
        let container = self.manager.ensure_running(user_id).await?;
        let root = format!("{}/{}", self.manager.workspace_root(), project);
        if !self.test(&container, "-d", &root).await {
            return Err(SandboxError::ProjectNotFound(project.to_string()));
        }
        Ok(ProjectScope { container, root })
    }

    async fn test(&self, container: &str, flag: &str, path: &str) -> bool {
        self.manager
            .exec(self.manager.exec_request(container, ["test", flag, path]))
            .await
            .success()
    }

    async fn find(&self, scope: &ProjectScope, kind: &str) -> Result<Vec<String>> {
        let output = self
            .manager
            .exec(self.manager.exec_request(
                &scope.container,
                ["find", scope.root.as_str(), "-mindepth", "1", "-type", kind],
            ))
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed("failed to list files", &output));
        }
        let prefix = format!("{}/", scope.root);
        Ok(output
            .stdout_lossy()
            .lines()
            .filter_map(|line| line.trim_end().strip_prefix(&prefix))
            .filter(|rel| !rel.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Project files relative to the project root, excluding build output and VCS data
    pub async fn list(&self, user_id: &str, project: &str) -> Result<Vec<String>> {
        let scope = self.scope(user_id, project).await?;
        let mut files: Vec<String> = self
            .find(&scope, "f")
            .await?
            .into_iter()
            .filter(|rel| is_visible(rel, false))
            .collect();
        files.sort();
        debug!(user_id, project, count = files.len(), "Listed project files");
        Ok(files)
    }

    /// Nested directory tree of the project, directories first
    pub async fn tree(&self, user_id: &str, project: &str) -> Result<Vec<FileEntry>> {
        let scope = self.scope(user_id, project).await?;
        let dirs = self.find(&scope, "d").await?;
        let files = self.find(&scope, "f").await?;

        let mut root = TreeNode::default();
        for dir in dirs.iter().filter(|d| is_visible(d, true)) {
            root.insert(dir, true);
        }
        for file in files.iter().filter(|f| is_visible(f, false)) {
            root.insert(file, false);
        }
        Ok(root.into_entries(""))
    }

    /// Raw bytes of a project file, subject to the size cap
    pub async fn read(&self, user_id: &str, project: &str, path: &str) -> Result<Vec<u8>> {
        let scope = self.scope(user_id, project).await?;
        let full = paths::resolve(&scope.root, path)?;
        if !self.test(&scope.container, "-f", &full).await {
            return Err(SandboxError::FileNotFound(paths::sanitize(path)));
        }

        if let Some(size) = self.size_of(&scope.container, &full).await {
            if size > self.max_file_bytes {
                return Err(SandboxError::FileTooLarge {
                    path: paths::sanitize(path),
                    limit: self.max_file_bytes,
                });
            }
        }

        let encoded_cap = self.max_file_bytes / 3 * 4 + self.max_file_bytes / 57 + 1024;
        let output = self
            .manager
            .exec(
                self.manager
                    .exec_request(&scope.container, ["base64", full.as_str()])
                    .max_output_bytes(encoded_cap),
            )
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed(
                format!("failed to read {}", paths::sanitize(path)),
                &output,
            ));
        }
        decode_base64_output(&output.stdout)
    }

    /// Overwrite an existing file, then compare its on-disk size with the input
    pub async fn write(
        &self,
        user_id: &str,
        project: &str,
        path: &str,
        content: &[u8],
    ) -> Result<WriteReport> {
        let scope = self.scope(user_id, project).await?;
        let full = paths::resolve(&scope.root, path)?;
        if !self.test(&scope.container, "-f", &full).await {
            return Err(SandboxError::FileNotFound(paths::sanitize(path)));
        }

        self.write_bytes(&scope.container, &full, content).await?;

        let verified = match self.size_of(&scope.container, &full).await {
            Some(size) if size == content.len() => true,
            Some(size) => {
                self.manager.events().warn(
                    user_id,
                    format!(
                        "Size mismatch after saving {}: expected {} bytes, found {}",
                        paths::sanitize(path),
                        content.len(),
                        size
                    ),
                );
                false
            }
            None => {
                self.manager.events().warn(
                    user_id,
                    format!("Could not verify saved file {}", paths::sanitize(path)),
                );
                false
            }
        };

        Ok(WriteReport {
            bytes_written: content.len(),
            verified,
        })
    }

    /// Create a new file, making parent directories as needed
    pub async fn create_file(
        &self,
        user_id: &str,
        project: &str,
        path: &str,
        content: &[u8],
    ) -> Result<()> {
        let scope = self.scope(user_id, project).await?;
        let full = paths::resolve(&scope.root, path)?;
        if full == scope.root || self.test(&scope.container, "-e", &full).await {
            return Err(SandboxError::AlreadyExists(paths::sanitize(path)));
        }

        if let Some(parent) = paths::parent(&full) {
            self.mkdir_p(&scope.container, parent).await?;
        }

        if content.is_empty() {
            let output = self
                .manager
                .exec(
                    self.manager
                        .exec_request(&scope.container, ["touch", full.as_str()]),
                )
                .await;
            if !output.success() {
                return Err(SandboxError::command_failed(
                    format!("failed to create {}", paths::sanitize(path)),
                    &output,
                ));
            }
        } else {
            self.write_bytes(&scope.container, &full, content).await?;
        }
        info!(user_id, project, path = %paths::sanitize(path), "Created file");
        Ok(())
    }

    /// Recursive directory creation; existing directories are fine
    pub async fn create_folder(&self, user_id: &str, project: &str, path: &str) -> Result<()> {
        let scope = self.scope(user_id, project).await?;
        let full = paths::resolve(&scope.root, path)?;
        self.mkdir_p(&scope.container, &full).await?;
        info!(user_id, project, path = %paths::sanitize(path), "Created folder");
        Ok(())
    }

    pub async fn delete_file(&self, user_id: &str, project: &str, path: &str) -> Result<()> {
        let scope = self.scope(user_id, project).await?;
        let full = paths::resolve(&scope.root, path)?;
        if !self.test(&scope.container, "-f", &full).await {
            return Err(SandboxError::FileNotFound(paths::sanitize(path)));
        }
        self.remove(&scope.container, &["rm", "-f", full.as_str()], path)
            .await
    }

    /// Recursive removal of a folder below the project root
    pub async fn delete_folder(&self, user_id: &str, project: &str, path: &str) -> Result<()> {
        let scope = self.scope(user_id, project).await?;
        let full = paths::resolve(&scope.root, path)?;
        if full == scope.root {
            return Err(SandboxError::PathTraversalRejected(path.to_string()));
        }
        if !self.test(&scope.container, "-d", &full).await {
            return Err(SandboxError::FileNotFound(paths::sanitize(path)));
        }
        self.remove(&scope.container, &["rm", "-rf", full.as_str()], path)
            .await
    }

    async fn remove(&self, container: &str, argv: &[&str], path: &str) -> Result<()> {
        let output = self
            .manager
            .exec(self.manager.exec_request(container, argv.iter().copied()))
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed(
                format!("failed to delete {}", paths::sanitize(path)),
                &output,
            ));
        }
        Ok(())
    }

    async fn mkdir_p(&self, container: &str, dir: &str) -> Result<()> {
        let output = self
            .manager
            .exec(self.manager.exec_request(container, ["mkdir", "-p", dir]))
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed(
                format!("failed to create directory {}", dir),
                &output,
            ));
        }
        Ok(())
    }

    pub(crate) async fn write_bytes(&self, container: &str, full: &str, content: &[u8]) -> Result<()> {
        let encoded = STANDARD.encode(content);
        let output = self
            .manager
            .exec(
                self.manager
                    .exec_request(container, ["sh", "-c", WRITE_SCRIPT, "sh", full])
                    .stdin(encoded.into_bytes()),
            )
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed(
                format!("failed to write {}", full),
                &output,
            ));
        }
        Ok(())
    }

    pub(crate) async fn size_of(&self, container: &str, full: &str) -> Option<usize> {
        let output = self
            .manager
            .exec(self.manager.exec_request(container, ["stat", "-c", "%s", full]))
            .await;
        if !output.success() {
            return None;
        }
        output.stdout_trimmed().parse().ok()
    }
}

pub(crate) fn validate_project_name(project: &str) -> Result<&str> {
    let project = project.trim();
    if project.is_empty() {
        return Err(SandboxError::ProjectRequired);
    }
    if !paths::is_safe_name(project) {
        return Err(SandboxError::InvalidProjectName(project.to_string()));
    }
    Ok(project)
}

/// Decode `base64` tool output, which wraps lines
pub(crate) fn decode_base64_output(stdout: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = stdout
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SandboxError::Internal(format!("invalid base64 from sandbox: {}", e)))
}

fn is_visible(rel: &str, is_dir: bool) -> bool {
    let segments: Vec<&str> = rel.split('/').collect();
    let dir_segments = if is_dir {
        &segments[..]
    } else {
        &segments[..segments.len().saturating_sub(1)]
    };
    if dir_segments.iter().any(|s| EXCLUDED_DIRS.contains(s)) {
        return false;
    }
    if !is_dir {
        if let Some(name) = segments.last() {
            return !EXCLUDED_FILES.contains(name);
        }
    }
    true
}

#[derive(Default)]
struct TreeNode {
    is_dir: bool,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn insert(&mut self, rel: &str, is_dir: bool) {
        let parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty()).collect();
        let mut node = self;
        for (idx, part) in parts.iter().enumerate() {
            node = node.children.entry(part.to_string()).or_default();
            if idx + 1 < parts.len() {
                node.is_dir = true;
            }
        }
        if is_dir {
            node.is_dir = true;
        }
    }

    fn into_entries(self, prefix: &str) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = self
            .children
            .into_iter()
            .map(|(name, node)| {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                if node.is_dir {
                    let children = node.into_entries(&path);
                    FileEntry {
                        name,
                        path,
                        kind: EntryKind::Directory,
                        children: Some(children),
                    }
                } else {
                    FileEntry {
                        name,
                        path,
                        kind: EntryKind::File,
                        children: None,
                    }
                }
            })
            .collect();
        entries.sort_by_key(|e| (e.kind == EntryKind::File, e.name.clone()));
        entries
    }
}
