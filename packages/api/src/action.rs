// ABOUTME: The closed set of actions accepted by the action-dispatch endpoint
// ABOUTME: Requests are JSON objects tagged by `action` with camelCase fields

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;

use crate::response::ApiError;

/// How `content` is encoded in file writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    #[default]
    Utf8,
    Base64,
}

/// File content as sent by the client
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

impl Content {
    pub fn bytes(&self) -> Result<Vec<u8>, ApiError> {
        match self.encoding {
            ContentEncoding::Utf8 => Ok(self.content.as_bytes().to_vec()),
            ContentEncoding::Base64 => STANDARD
                .decode(self.content.trim())
                .map_err(|e| ApiError::BadRequest(format!("Invalid base64 content: {}", e))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    Create {
        user_id: String,
    },
    Delete {
        user_id: String,
    },
    CheckHealth {
        user_id: String,
    },
    GetFiles {
        user_id: String,
        project_name: Option<String>,
    },
    GetFileTree {
        user_id: String,
        project_name: Option<String>,
    },
    GetFileContent {
        user_id: String,
        project_name: Option<String>,
        file_path: String,
    },
    SaveFileContent {
        user_id: String,
        project_name: Option<String>,
        file_path: String,
        #[serde(flatten)]
        content: Content,
    },
    CreateFile {
        user_id: String,
        project_name: Option<String>,
        file_path: String,
        #[serde(flatten)]
        content: Content,
    },
    CreateFolder {
        user_id: String,
        project_name: Option<String>,
        file_path: String,
    },
    DeleteFile {
        user_id: String,
        project_name: Option<String>,
        file_path: String,
    },
    DeleteFolder {
        user_id: String,
        project_name: Option<String>,
        file_path: String,
    },
    GetAllProjects {
        user_id: String,
    },
    CreateProject {
        user_id: String,
        project_name: Option<String>,
        description: Option<String>,
    },
    DeleteProject {
        user_id: String,
        project_name: Option<String>,
    },
    GetProject {
        user_id: String,
        project_name: Option<String>,
    },
    RenameProject {
        user_id: String,
        project_name: Option<String>,
        new_name: String,
    },
    BuildContract {
        user_id: String,
        project_name: Option<String>,
    },
    GetBuildStatus {
        user_id: String,
        project_name: Option<String>,
    },
    CleanBuild {
        user_id: String,
        project_name: Option<String>,
    },
    /// CLI-signed deploy, or wallet-signed when `walletAddress` is present
    DeployContract {
        user_id: String,
        project_name: Option<String>,
        source_account: Option<String>,
        wallet_address: Option<String>,
        #[serde(default)]
        use_existing_build: bool,
    },
    GetDeploymentStatus {
        user_id: String,
        project_name: Option<String>,
    },
    CreateAccount {
        user_id: String,
        account_name: Option<String>,
        project_name: Option<String>,
    },
    GetAccountStatus {
        user_id: String,
        account_name: Option<String>,
    },
    /// Completes a pending wallet signature request
    SubmitSignature {
        user_id: String,
        request_id: String,
        signed_xdr: Option<String>,
        reason: Option<String>,
    },
}

impl Action {
    pub const NAMES: [&'static str; 24] = [
        "create",
        "delete",
        "checkHealth",
        "getFiles",
        "getFileTree",
        "getFileContent",
        "saveFileContent",
        "createFile",
        "createFolder",
        "deleteFile",
        "deleteFolder",
        "getAllProjects",
        "createProject",
        "deleteProject",
        "getProject",
        "renameProject",
        "buildContract",
        "getBuildStatus",
        "cleanBuild",
        "deployContract",
        "getDeploymentStatus",
        "createAccount",
        "getAccountStatus",
        "submitSignature",
    ];

    /// Parse a request body, telling unknown actions apart from malformed ones
    pub fn from_slice(body: &[u8]) -> Result<Self, ApiError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        let name = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::BadRequest("Missing action".to_string()))?;
        if !Self::NAMES.contains(&name) {
            return Err(ApiError::UnknownAction(name.to_string()));
        }
        serde_json::from_value(value)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Delete { .. } => "delete",
            Action::CheckHealth { .. } => "checkHealth",
            Action::GetFiles { .. } => "getFiles",
            Action::GetFileTree { .. } => "getFileTree",
            Action::GetFileContent { .. } => "getFileContent",
            Action::SaveFileContent { .. } => "saveFileContent",
            Action::CreateFile { .. } => "createFile",
            Action::CreateFolder { .. } => "createFolder",
            Action::DeleteFile { .. } => "deleteFile",
            Action::DeleteFolder { .. } => "deleteFolder",
            Action::GetAllProjects { .. } => "getAllProjects",
            Action::CreateProject { .. } => "createProject",
            Action::DeleteProject { .. } => "deleteProject",
            Action::GetProject { .. } => "getProject",
            Action::RenameProject { .. } => "renameProject",
            Action::BuildContract { .. } => "buildContract",
            Action::GetBuildStatus { .. } => "getBuildStatus",
            Action::CleanBuild { .. } => "cleanBuild",
            Action::DeployContract { .. } => "deployContract",
            Action::GetDeploymentStatus { .. } => "getDeploymentStatus",
            Action::CreateAccount { .. } => "createAccount",
            Action::GetAccountStatus { .. } => "getAccountStatus",
            Action::SubmitSignature { .. } => "submitSignature",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Action::Create { user_id }
            | Action::Delete { user_id }
            | Action::CheckHealth { user_id }
            | Action::GetFiles { user_id, .. }
            | Action::GetFileTree { user_id, .. }
            | Action::GetFileContent { user_id, .. }
            | Action::SaveFileContent { user_id, .. }
            | Action::CreateFile { user_id, .. }
            | Action::CreateFolder { user_id, .. }
            | Action::DeleteFile { user_id, .. }
            | Action::DeleteFolder { user_id, .. }
            | Action::GetAllProjects { user_id }
            | Action::CreateProject { user_id, .. }
            | Action::DeleteProject { user_id, .. }
            | Action::GetProject { user_id, .. }
            | Action::RenameProject { user_id, .. }
            | Action::BuildContract { user_id, .. }
            | Action::GetBuildStatus { user_id, .. }
            | Action::CleanBuild { user_id, .. }
            | Action::DeployContract { user_id, .. }
            | Action::GetDeploymentStatus { user_id, .. }
            | Action::CreateAccount { user_id, .. }
            | Action::GetAccountStatus { user_id, .. }
            | Action::SubmitSignature { user_id, .. } => user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_parses_camel_case_fields() {
        let action = Action::from_slice(
            json!({
                "action": "saveFileContent",
                "userId": "alice",
                "projectName": "hello",
                "filePath": "src/lib.rs",
                "content": "fn main() {}"
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::SaveFileContent {
                user_id: "alice".into(),
                project_name: Some("hello".into()),
                file_path: "src/lib.rs".into(),
                content: Content {
                    content: "fn main() {}".into(),
                    encoding: ContentEncoding::Utf8,
                },
            }
        );
        assert_eq!(action.name(), "saveFileContent");
        assert_eq!(action.user_id(), "alice");
    }

    #[test]
    fn test_base64_content() {
        let action = Action::from_slice(
            br#"{"action":"createFile","userId":"a","projectName":"p","filePath":"x.bin","content":"AP8=","encoding":"base64"}"#,
        )
        .unwrap();
        let Action::CreateFile { content, .. } = action else {
            panic!("wrong variant");
        };
        assert_eq!(content.bytes().unwrap(), vec![0x00, 0xff]);
    }

    #[rstest]
    #[case(br#"{"action":"launchMissiles","userId":"a"}"#.as_slice(), true)]
    #[case(br#"{"userId":"a"}"#.as_slice(), false)]
    #[case(br#"{"action":"getFileContent","userId":"a"}"#.as_slice(), false)]
    #[case(b"not json".as_slice(), false)]
    fn test_rejections(#[case] body: &[u8], #[case] unknown: bool) {
        match Action::from_slice(body) {
            Err(ApiError::UnknownAction(_)) => assert!(unknown),
            Err(ApiError::BadRequest(_)) => assert!(!unknown),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_every_name_is_a_variant() {
        for name in Action::NAMES {
            let parsed = serde_json::from_value::<Action>(json!({"action": name}));
            let message = parsed.unwrap_err().to_string();
            assert!(
                !message.contains("unknown variant"),
                "{} is not an action: {}",
                name,
                message
            );
        }
    }
}
