// ABOUTME: Client-to-server message preparation for the language server bridge
// ABOUTME: Only the initialize request is rewritten; everything else passes through unchanged

use serde_json::{json, Value};
use tracing::debug;

/// Values injected into the client's initialize request
#[derive(Debug, Clone)]
pub struct InitializeOverrides {
    pub process_id: u32,
    /// Absolute path of the workspace inside the sandbox
    pub workspace_dir: String,
}

impl InitializeOverrides {
    pub fn new(workspace_dir: impl Into<String>) -> Self {
        Self {
            process_id: std::process::id(),
            workspace_dir: workspace_dir.into(),
        }
    }

    fn workspace_folders(&self) -> Value {
        json!([{
            "uri": format!("file://{}", self.workspace_dir),
            "name": "workspace",
        }])
    }
}

/// Bytes to forward to the language server for one client frame
pub fn prepare_client_message(frame: &[u8], overrides: &InitializeOverrides) -> Vec<u8> {
    match rewrite_initialize(frame, overrides) {
        Some(rewritten) => rewritten,
        None => frame.to_vec(),
    }
}

/// Rewritten body if `frame` is an initialize request, otherwise `None`
pub fn rewrite_initialize(frame: &[u8], overrides: &InitializeOverrides) -> Option<Vec<u8>> {
    // Cheap pre-check so ordinary traffic is never parsed
    if !contains(frame, b"\"initialize\"") {
        return None;
    }
    let mut message: Value = serde_json::from_slice(frame).ok()?;
    if message.get("method").and_then(Value::as_str) != Some("initialize") {
        return None;
    }
    let params = message.get_mut("params")?.as_object_mut()?;

    params.insert("processId".to_string(), json!(overrides.process_id));
    let has_folders = params
        .get("workspaceFolders")
        .is_some_and(|folders| !folders.is_null());
    if !has_folders {
        params.insert("workspaceFolders".to_string(), overrides.workspace_folders());
    }

    debug!(workspace = %overrides.workspace_dir, "Rewrote initialize request");
    serde_json::to_vec(&message).ok()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
