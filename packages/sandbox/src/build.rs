// ABOUTME: Contract build pipeline running the stellar and cargo build steps inside the sandbox
// ABOUTME: Tracks per-request pipeline stages and locates the compiled wasm artifact

use crate::error::{Diagnostics, Result, SandboxError};
use crate::events::{EventBus, PipelineStage};
use crate::files::{decode_base64_output, FileGateway, ProjectScope};
use crate::manager::SandboxManager;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use sorobox_config::ToolchainSettings;
use std::sync::Arc;
use tracing::{info, warn};

/// Stage tracker for one build or deploy request
#[derive(Debug)]
pub struct PipelineRun {
    user_id: String,
    project: String,
    stage: PipelineStage,
    events: EventBus,
}

impl PipelineRun {
    pub fn new(user_id: &str, project: &str, events: EventBus) -> Self {
        Self {
            user_id: user_id.to_string(),
            project: project.to_string(),
            stage: PipelineStage::Idle,
            events,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Move to `next` if the transition is legal; illegal transitions are ignored
    pub fn advance(&mut self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        let legal = matches!(
            (self.stage, next),
            (Idle, Building)
                | (Building, Built)
                | (Building, BuildFailed)
                | (Built, Deploying)
                | (Deploying, Deployed)
                | (Deploying, DeployFailed)
        );
        if !legal {
            warn!(from = ?self.stage, to = ?next, project = %self.project, "Ignoring illegal pipeline transition");
            return false;
        }
        self.stage = next;
        self.events.stage(&self.user_id, &self.project, next);
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildArtifact {
    pub bytes: Vec<u8>,
    /// Path of the wasm file inside the sandbox
    pub path: String,
    pub build_output: String,
}

impl BuildArtifact {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    pub is_built: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
}

pub struct BuildPipeline {
    manager: Arc<SandboxManager>,
    files: Arc<FileGateway>,
    toolchain: ToolchainSettings,
}

impl BuildPipeline {
    pub fn new(
        manager: Arc<SandboxManager>,
        files: Arc<FileGateway>,
        toolchain: ToolchainSettings,
    ) -> Self {
        Self {
            manager,
            files,
            toolchain,
        }
    }

    pub fn toolchain(&self) -> &ToolchainSettings {
        &self.toolchain
    }

    pub fn manager(&self) -> &Arc<SandboxManager> {
        &self.manager
    }

    pub fn files(&self) -> &Arc<FileGateway> {
        &self.files
    }

    fn release_dir(&self, scope: &ProjectScope) -> String {
        format!("{}/target/{}/release", scope.root, self.toolchain.wasm_target)
    }

    /// Compile the project and return its wasm artifact
    pub async fn build(&self, user_id: &str, project: &str) -> Result<BuildArtifact> {
        let mut run = PipelineRun::new(user_id, project, self.manager.events().clone());
        let scope = self.files.scope(user_id, project).await?;
        self.build_in(&mut run, &scope).await
    }

    pub(crate) async fn build_in(
        &self,
        run: &mut PipelineRun,
        scope: &ProjectScope,
    ) -> Result<BuildArtifact> {
        let user_id = run.user_id.clone();
        let events = self.manager.events();
        run.advance(PipelineStage::Building);

        let steps: [(&str, Vec<&str>, std::time::Duration); 2] = [
            (
                "contract build",
                vec![self.toolchain.stellar_bin.as_str(), "contract", "build"],
                self.toolchain.contract_build_timeout,
            ),
            (
                "compile",
                vec![
                    self.toolchain.cargo_bin.as_str(),
                    "build",
                    "--target",
                    self.toolchain.wasm_target.as_str(),
                    "--release",
                ],
                self.toolchain.compile_timeout,
            ),
        ];

        let mut log = String::new();
        for (step, argv, timeout) in steps {
            events.info(&user_id, format!("Running {}", argv.join(" ")));
            let output = self
                .manager
                .exec(
                    self.manager
                        .exec_request(&scope.container, argv)
                        .workdir(scope.root.as_str())
                        .timeout(timeout)
                        .max_output_bytes(self.toolchain.max_output_bytes),
                )
                .await;
            log.push_str(&output.combined());

            if !output.success() {
                events.error(
                    &user_id,
                    format!("{} failed: {}", step, output.failure_summary()),
                );
                run.advance(PipelineStage::BuildFailed);
                return Err(SandboxError::BuildFailed {
                    step: step.to_string(),
                    diagnostics: (&output).into(),
                });
            }
        }

        let path = match self.locate_artifact(scope).await {
            Ok(path) => path,
            Err(expected) => {
                events.error(&user_id, format!("Build produced no artifact at {}", expected));
                run.advance(PipelineStage::BuildFailed);
                return Err(SandboxError::ArtifactMissingAfterBuild {
                    path: expected,
                    diagnostics: Diagnostics::new(log, String::new()),
                });
            }
        };

        let bytes = match self.read_artifact(scope, &path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                run.advance(PipelineStage::BuildFailed);
                return Err(e);
            }
        };

        info!(user_id = %user_id, path = %path, size = bytes.len(), "Build succeeded");
        events.info(&user_id, format!("Build succeeded ({} bytes)", bytes.len()));
        run.advance(PipelineStage::Built);
        Ok(BuildArtifact {
            bytes,
            path,
            build_output: log,
        })
    }

    /// Expected artifact path, or the only wasm file in the release directory.
    /// On failure returns the expected path for diagnostics.
    async fn locate_artifact(&self, scope: &ProjectScope) -> std::result::Result<String, String> {
        let dir = self.release_dir(scope);
        let expected = format!("{}/{}", dir, self.toolchain.artifact_name);
        let exists = self
            .manager
            .exec(
                self.manager
                    .exec_request(&scope.container, ["test", "-f", expected.as_str()]),
            )
            .await;
        if exists.success() {
            return Ok(expected);
        }

        let listing = self
            .manager
            .exec(self.manager.exec_request(
                &scope.container,
                [
                    "find",
                    dir.as_str(),
                    "-maxdepth",
                    "1",
                    "-type",
                    "f",
                    "-name",
                    "*.wasm",
                ],
            ))
            .await;
        let candidates: Vec<String> = listing
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        match candidates.as_slice() {
            [only] if listing.success() => Ok(only.clone()),
            _ => Err(expected),
        }
    }

    async fn read_artifact(&self, scope: &ProjectScope, path: &str) -> Result<Vec<u8>> {
        if let Some(size) = self.files.size_of(&scope.container, path).await {
            if size > self.toolchain.max_artifact_bytes {
                return Err(SandboxError::FileTooLarge {
                    path: path.to_string(),
                    limit: self.toolchain.max_artifact_bytes,
                });
            }
        }
        let cap = self.toolchain.max_artifact_bytes / 3 * 4 + self.toolchain.max_artifact_bytes / 57 + 1024;
        let output = self
            .manager
            .exec(
                self.manager
                    .exec_request(&scope.container, ["base64", path])
                    .max_output_bytes(cap),
            )
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed("failed to read build artifact", &output));
        }
        decode_base64_output(&output.stdout)
    }

    /// Whether a built artifact is present, without building
    pub async fn build_status(&self, user_id: &str, project: &str) -> Result<BuildStatus> {
        let scope = self.files.scope(user_id, project).await?;
        match self.locate_artifact(&scope).await {
            Ok(path) => Ok(BuildStatus {
                is_built: true,
                size: self.files.size_of(&scope.container, &path).await,
                artifact_path: Some(path),
            }),
            Err(_) => Ok(BuildStatus {
                is_built: false,
                size: None,
                artifact_path: None,
            }),
        }
    }

    /// Previously built artifact, if present
    pub(crate) async fn existing_artifact(&self, scope: &ProjectScope) -> Result<Option<BuildArtifact>> {
        match self.locate_artifact(scope).await {
            Ok(path) => {
                let bytes = self.read_artifact(scope, &path).await?;
                Ok(Some(BuildArtifact {
                    bytes,
                    path,
                    build_output: String::new(),
                }))
            }
            Err(_) => Ok(None),
        }
    }

    /// Remove build output with `cargo clean`
    pub async fn clean(&self, user_id: &str, project: &str) -> Result<String> {
        let scope = self.files.scope(user_id, project).await?;
        let output = self
            .manager
            .exec(
                self.manager
                    .exec_request(&scope.container, [self.toolchain.cargo_bin.as_str(), "clean"])
                    .workdir(scope.root.as_str())
                    .timeout(self.toolchain.clean_timeout),
            )
            .await;
        if !output.success() {
            return Err(SandboxError::command_failed("cargo clean failed", &output));
        }
        self.manager
            .events()
            .info(user_id, format!("Cleaned build output for {}", project));
        Ok(output.combined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pipeline_transitions() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut run = PipelineRun::new("u", "p", events);

        assert!(!run.advance(PipelineStage::Deploying));
        assert_eq!(run.stage(), PipelineStage::Idle);

        assert!(run.advance(PipelineStage::Building));
        assert!(run.advance(PipelineStage::Built));
        assert!(run.advance(PipelineStage::Deploying));
        assert!(run.advance(PipelineStage::DeployFailed));
        assert!(run.stage().is_terminal());
        assert!(!run.advance(PipelineStage::Deployed));

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.kind,
            crate::events::EventKind::StageChanged {
                stage: PipelineStage::Building,
                ..
            }
        ));
    }

    #[test]
    fn test_artifact_base64() {
        let artifact = BuildArtifact {
            bytes: vec![0, 97, 115, 109],
            path: "/x.wasm".into(),
            build_output: String::new(),
        };
        assert_eq!(artifact.size(), 4);
        assert_eq!(artifact.to_base64(), "AGFzbQ==");
    }
}
