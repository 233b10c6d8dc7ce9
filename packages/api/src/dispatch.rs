// ABOUTME: Exhaustive dispatch of actions to the sandbox services
// ABOUTME: Sandbox failures become structured 200 replies; request faults propagate as ApiError

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use sorobox_sandbox::{ArtifactSource, PhaseStatus, SandboxError, SandboxStatus};
use tracing::{info, warn};

use crate::action::Action;
use crate::response::{ActionReply, ApiError};
use crate::signatures::SignatureResponse;
use crate::state::AppState;

enum Failure {
    Sandbox(SandboxError),
    Api(ApiError),
}

impl From<SandboxError> for Failure {
    fn from(err: SandboxError) -> Self {
        Failure::Sandbox(err)
    }
}

impl From<ApiError> for Failure {
    fn from(err: ApiError) -> Self {
        Failure::Api(err)
    }
}

fn project(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("")
}

pub async fn dispatch(state: &AppState, action: Action) -> Result<ActionReply, ApiError> {
    let name = action.name();
    let user_id = action.user_id().to_string();
    info!(action = name, user_id = %user_id, "Handling action");

    match run(state, action).await {
        Ok(reply) => Ok(reply),
        Err(Failure::Sandbox(err)) => {
            if err.is_client_error() {
                info!(action = name, user_id = %user_id, code = err.code(), "Action rejected: {}", err);
            } else {
                warn!(action = name, user_id = %user_id, code = err.code(), "Action failed: {}", err);
            }
            Ok(ActionReply::failure(&err))
        }
        Err(Failure::Api(err)) => Err(err),
    }
}

async fn run(state: &AppState, action: Action) -> Result<ActionReply, Failure> {
    let reply = match action {
        Action::Create { user_id } => ActionReply::ok(state.manager.create(&user_id).await?)?,

        Action::Delete { user_id } => {
            state.manager.delete(&user_id).await?;
            let container = state.manager.container_name(&user_id)?;
            ActionReply::message(format!("Container {} deleted", container))
                .with("containerName", container)
        }

        Action::CheckHealth { user_id } => {
            let status = state.manager.status(&user_id).await?;
            ActionReply::ok(json!({
                "healthy": status == SandboxStatus::Running,
                "status": status,
            }))?
        }

        Action::GetFiles {
            user_id,
            project_name,
        } => {
            let files = state.files.list(&user_id, project(&project_name)).await?;
            ActionReply::ok(json!({ "files": files }))?
        }

        Action::GetFileTree {
            user_id,
            project_name,
        } => {
            let tree = state.files.tree(&user_id, project(&project_name)).await?;
            ActionReply::ok(json!({ "tree": tree }))?
        }

        Action::GetFileContent {
            user_id,
            project_name,
            file_path,
        } => {
            let bytes = state
                .files
                .read(&user_id, project(&project_name), &file_path)
                .await?;
            match String::from_utf8(bytes) {
                Ok(content) => ActionReply::ok(json!({ "content": content }))?,
                Err(e) => ActionReply::ok(json!({
                    "content": STANDARD.encode(e.as_bytes()),
                    "encoding": "base64",
                }))?,
            }
        }

        Action::SaveFileContent {
            user_id,
            project_name,
            file_path,
            content,
        } => {
            let bytes = content.bytes()?;
            let report = state
                .files
                .write(&user_id, project(&project_name), &file_path, &bytes)
                .await?;
            ActionReply::ok(report)?.with("message", format!("Saved {}", file_path))
        }

        Action::CreateFile {
            user_id,
            project_name,
            file_path,
            content,
        } => {
            let bytes = content.bytes()?;
            state
                .files
                .create_file(&user_id, project(&project_name), &file_path, &bytes)
                .await?;
            ActionReply::message(format!("Created file {}", file_path))
        }

        Action::CreateFolder {
            user_id,
            project_name,
            file_path,
        } => {
            state
                .files
                .create_folder(&user_id, project(&project_name), &file_path)
                .await?;
            ActionReply::message(format!("Created folder {}", file_path))
        }

        Action::DeleteFile {
            user_id,
            project_name,
            file_path,
        } => {
            state
                .files
                .delete_file(&user_id, project(&project_name), &file_path)
                .await?;
            ActionReply::message(format!("Deleted file {}", file_path))
        }

        Action::DeleteFolder {
            user_id,
            project_name,
            file_path,
        } => {
            state
                .files
                .delete_folder(&user_id, project(&project_name), &file_path)
                .await?;
            ActionReply::message(format!("Deleted folder {}", file_path))
        }

        Action::GetAllProjects { user_id } => {
            let projects = state.projects.list(&user_id).await?;
            ActionReply::ok(json!({ "projects": projects }))?
        }

        Action::CreateProject {
            user_id,
            project_name,
            description,
        } => {
            let created = state
                .projects
                .create(&user_id, project(&project_name), description.as_deref())
                .await?;
            ActionReply::ok(json!({ "project": created }))?
        }

        Action::DeleteProject {
            user_id,
            project_name,
        } => {
            state
                .projects
                .delete(&user_id, project(&project_name))
                .await?;
            ActionReply::message(format!("Deleted project {}", project(&project_name)))
        }

        Action::GetProject {
            user_id,
            project_name,
        } => {
            let found = state.projects.get(&user_id, project(&project_name)).await?;
            ActionReply::ok(json!({ "project": found }))?
        }

        Action::RenameProject {
            user_id,
            project_name,
            new_name,
        } => {
            let renamed = state
                .projects
                .rename(&user_id, project(&project_name), &new_name)
                .await?;
            ActionReply::ok(json!({ "project": renamed }))?
        }

        Action::BuildContract {
            user_id,
            project_name,
        } => {
            let artifact = state.build.build(&user_id, project(&project_name)).await?;
            ActionReply::ok(json!({
                "wasmBase64": artifact.to_base64(),
                "wasmSize": artifact.size(),
                "artifactPath": artifact.path,
                "buildOutput": artifact.build_output,
                "message": "Build completed successfully",
            }))?
        }

        Action::GetBuildStatus {
            user_id,
            project_name,
        } => {
            let status = state
                .build
                .build_status(&user_id, project(&project_name))
                .await?;
            let message = if status.is_built {
                "Contract has been built"
            } else {
                "Contract has not been built yet"
            };
            let wasm_size = status.size;
            ActionReply::ok(status)?
                .with("wasmSize", json!(wasm_size))
                .with("message", message)
        }

        Action::CleanBuild {
            user_id,
            project_name,
        } => {
            let output = state.build.clean(&user_id, project(&project_name)).await?;
            ActionReply::message("Build artifacts cleaned successfully").with("output", output)
        }

        Action::DeployContract {
            user_id,
            project_name,
            source_account,
            wallet_address: Some(wallet_address),
            use_existing_build,
        } => {
            if source_account.is_some() {
                warn!(user_id = %user_id, "sourceAccount is ignored for wallet-signed deploys");
            }
            let source = if use_existing_build {
                ArtifactSource::Existing
            } else {
                ArtifactSource::Rebuild
            };
            let report = state
                .deploy
                .deploy_with_wallet(
                    &user_id,
                    project(&project_name),
                    &wallet_address,
                    source,
                    &state.signatures,
                )
                .await?;
            let success = report.success;
            let failed = report
                .phases
                .iter()
                .find(|p| p.status != PhaseStatus::Succeeded)
                .cloned();
            let mut reply = ActionReply::ok(report)?.with("success", success);
            if success {
                reply = reply.with("message", "Contract deployed successfully");
            } else {
                let detail = failed.as_ref().and_then(|p| p.detail.clone());
                reply = reply
                    .with(
                        "error",
                        detail.unwrap_or_else(|| "Deployment did not complete".to_string()),
                    )
                    .with("code", "DEPLOY_FAILED");
                if let Some(diagnostics) = failed.and_then(|p| p.diagnostics) {
                    reply = reply
                        .with("stdout", diagnostics.stdout)
                        .with("stderr", diagnostics.stderr);
                }
            }
            reply
        }

        Action::DeployContract {
            user_id,
            project_name,
            source_account,
            wallet_address: None,
            ..
        } => {
            let deployment = state
                .deploy
                .deploy(&user_id, project(&project_name), source_account.as_deref())
                .await?;
            ActionReply::ok(deployment)?.with("message", "Contract deployed successfully")
        }

        Action::GetDeploymentStatus {
            user_id,
            project_name,
        } => {
            let status = state
                .deploy
                .deployment_status(&user_id, project(&project_name))
                .await?;
            let message = if status.is_deployed {
                "Contract has been deployed"
            } else {
                "Contract has not been deployed yet"
            };
            ActionReply::ok(status)?.with("message", message)
        }

        Action::CreateAccount {
            user_id,
            account_name,
            project_name,
        } => {
            let created = state
                .accounts
                .create_account(&user_id, account_name.as_deref(), project_name.as_deref())
                .await?;
            let message = match created.warning {
                Some(_) => "Account created",
                None => "Account created and credentials backed up",
            };
            ActionReply::ok(created)?.with("message", message)
        }

        Action::GetAccountStatus {
            user_id,
            account_name,
        } => {
            let status = state
                .accounts
                .account_status(&user_id, account_name.as_deref())
                .await?;
            let exists = status.exists;
            ActionReply::ok(status)?.with("accountExists", exists)
        }

        Action::SubmitSignature {
            user_id,
            request_id,
            signed_xdr,
            reason,
        } => {
            let response = match signed_xdr.filter(|xdr| !xdr.trim().is_empty()) {
                Some(xdr) => SignatureResponse::Signed(xdr),
                None => SignatureResponse::Rejected(
                    reason.unwrap_or_else(|| "User rejected the signature request".to_string()),
                ),
            };
            state.signatures.submit(&user_id, &request_id, response)?;
            ActionReply::message("Signature response delivered").with("requestId", request_id)
        }
    };
    Ok(reply)
}
