// ABOUTME: Error types for sandbox orchestration, file access and the build/deploy pipeline
// ABOUTME: Failures that involve an external tool carry its captured stdout/stderr

use crate::exec::CommandOutput;
use serde::Serialize;
use thiserror::Error;

/// Captured output of the external tool that caused a failure
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub stdout: String,
    pub stderr: String,
}

impl Diagnostics {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

impl From<&CommandOutput> for Diagnostics {
    fn from(output: &CommandOutput) -> Self {
        Self {
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SandboxError {
    /// User identifier contains characters that cannot form a container name
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// The user's sandbox is absent or not running
    #[error("Sandbox container {0} is not running")]
    ContainerUnavailable(String),

    /// Container launch or startup verification failed
    #[error("Failed to create sandbox: {message}")]
    ContainerCreationFailed {
        message: String,
        diagnostics: Diagnostics,
    },

    /// Operation needs a project but none was selected
    #[error("Please select a project")]
    ProjectRequired,

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project already exists: {0}")]
    ProjectExists(String),

    #[error("Invalid project name: {0}")]
    InvalidProjectName(String),

    #[error("Invalid account name: {0}")]
    InvalidAccountName(String),

    /// Resolved path would escape its root
    #[error("Path escapes the project root: {0}")]
    PathTraversalRejected(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("File too large: {path} exceeds {limit} bytes")]
    FileTooLarge { path: String, limit: usize },

    /// A compilation step exited unsuccessfully
    #[error("Build failed during {step}")]
    BuildFailed {
        step: String,
        diagnostics: Diagnostics,
    },

    /// Every build step succeeded but no wasm artifact was produced
    #[error("Build completed but artifact is missing at {path}")]
    ArtifactMissingAfterBuild {
        path: String,
        diagnostics: Diagnostics,
    },

    #[error("Deployment failed: {message}")]
    DeployFailed {
        message: String,
        diagnostics: Diagnostics,
    },

    /// The external wallet declined or never answered a signature request
    #[error("Signature not provided: {0}")]
    SignatureRejected(String),

    #[error("Failed to generate credentials")]
    CredentialGenerationFailed { diagnostics: Diagnostics },

    #[error("Failed to spawn subprocess: {0}")]
    SubprocessSpawnFailed(String),

    #[error("No sandbox available for language server: {0}")]
    BridgeDiscoveryFailed(String),

    /// A helper command failed where no more specific error applies
    #[error("Command failed: {message}")]
    CommandFailed {
        message: String,
        diagnostics: Diagnostics,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

impl SandboxError {
    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::InvalidUserId(_) => "INVALID_USER_ID",
            SandboxError::ContainerUnavailable(_) => "CONTAINER_UNAVAILABLE",
            SandboxError::ContainerCreationFailed { .. } => "CONTAINER_CREATION_FAILED",
            SandboxError::ProjectRequired => "PROJECT_REQUIRED",
            SandboxError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            SandboxError::ProjectExists(_) => "PROJECT_EXISTS",
            SandboxError::InvalidProjectName(_) => "INVALID_PROJECT_NAME",
            SandboxError::InvalidAccountName(_) => "INVALID_ACCOUNT_NAME",
            SandboxError::PathTraversalRejected(_) => "PATH_TRAVERSAL_REJECTED",
            SandboxError::FileNotFound(_) => "FILE_NOT_FOUND",
            SandboxError::AlreadyExists(_) => "ALREADY_EXISTS",
            SandboxError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            SandboxError::BuildFailed { .. } => "BUILD_FAILED",
            SandboxError::ArtifactMissingAfterBuild { .. } => "ARTIFACT_MISSING_AFTER_BUILD",
            SandboxError::DeployFailed { .. } => "DEPLOY_FAILED",
            SandboxError::SignatureRejected(_) => "SIGNATURE_REJECTED",
            SandboxError::CredentialGenerationFailed { .. } => "CREDENTIAL_GENERATION_FAILED",
            SandboxError::SubprocessSpawnFailed(_) => "SUBPROCESS_SPAWN_FAILED",
            SandboxError::BridgeDiscoveryFailed(_) => "BRIDGE_DISCOVERY_FAILED",
            SandboxError::CommandFailed { .. } => "COMMAND_FAILED",
            SandboxError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Tool output attached to this error, if any
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            SandboxError::ContainerCreationFailed { diagnostics, .. }
            | SandboxError::BuildFailed { diagnostics, .. }
            | SandboxError::ArtifactMissingAfterBuild { diagnostics, .. }
            | SandboxError::DeployFailed { diagnostics, .. }
            | SandboxError::CredentialGenerationFailed { diagnostics }
            | SandboxError::CommandFailed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    /// Whether the failure is caused by the caller's input rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SandboxError::InvalidUserId(_)
                | SandboxError::ProjectRequired
                | SandboxError::ProjectNotFound(_)
                | SandboxError::ProjectExists(_)
                | SandboxError::InvalidProjectName(_)
                | SandboxError::InvalidAccountName(_)
                | SandboxError::PathTraversalRejected(_)
                | SandboxError::FileNotFound(_)
                | SandboxError::AlreadyExists(_)
                | SandboxError::FileTooLarge { .. }
        )
    }

    pub(crate) fn command_failed(message: impl Into<String>, output: &CommandOutput) -> Self {
        SandboxError::CommandFailed {
            message: message.into(),
            diagnostics: output.into(),
        }
    }
}
