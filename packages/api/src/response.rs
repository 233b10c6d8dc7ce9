// ABOUTME: Response shapes for the action endpoint and the conversion of failures into them
// ABOUTME: Operation failures stay 200 with success false; bad requests are 400 and internal faults 500

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sorobox_sandbox::SandboxError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    /// Body could not be interpreted as an action
    #[error("{0}")]
    BadRequest(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                warn!("Rejected request: {}", message);
                (StatusCode::BAD_REQUEST, ResponseJson(json!({ "error": message }))).into_response()
            }
            ApiError::UnknownAction(action) => {
                warn!(action, "Unknown action");
                (
                    StatusCode::BAD_REQUEST,
                    ResponseJson(json!({ "error": "Unknown action", "action": action })),
                )
                    .into_response()
            }
            ApiError::Internal(details) => internal_error(details),
        }
    }
}

/// 500 body shared by handler errors and caught panics
pub fn internal_error(details: impl Into<String>) -> Response {
    let details = details.into();
    error!(details = %details, "Internal server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ResponseJson(json!({ "error": "Internal server error", "details": details })),
    )
        .into_response()
}

/// Outcome of one dispatched action, always rendered with status 200
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReply {
    body: Map<String, Value>,
}

impl ActionReply {
    /// `{success: true}` merged with the fields of `data`
    pub fn ok<T: Serialize>(data: T) -> Result<Self, ApiError> {
        let mut body = match serde_json::to_value(data)
            .map_err(|e| ApiError::Internal(format!("failed to serialize response: {}", e)))?
        {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        body.insert("success".to_string(), Value::Bool(true));
        Ok(Self { body })
    }

    pub fn message(message: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(true));
        body.insert("message".to_string(), Value::String(message.into()));
        Self { body }
    }

    /// Structured failure carrying the error code and any captured tool output
    pub fn failure(err: &SandboxError) -> Self {
        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(false));
        body.insert("error".to_string(), Value::String(err.to_string()));
        body.insert("code".to_string(), Value::String(err.code().to_string()));
        if let Some(diagnostics) = err.diagnostics() {
            body.insert("stdout".to_string(), Value::String(diagnostics.stdout.clone()));
            body.insert("stderr".to_string(), Value::String(diagnostics.stderr.clone()));
            body.insert(
                "output".to_string(),
                Value::String(format!("{}{}", diagnostics.stdout, diagnostics.stderr)),
            );
        }
        if let SandboxError::BuildFailed { step, .. } = err {
            body.insert("step".to_string(), Value::String(step.clone()));
        }
        Self { body }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.body.get("success") == Some(&Value::Bool(true))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

impl IntoResponse for ActionReply {
    fn into_response(self) -> Response {
        (StatusCode::OK, ResponseJson(self.into_value())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sorobox_sandbox::Diagnostics;

    #[test]
    fn test_ok_merges_fields() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Created {
            container_name: String,
        }
        let reply = ActionReply::ok(Created {
            container_name: "useralice".into(),
        })
        .unwrap();
        assert_eq!(
            reply.into_value(),
            json!({"success": true, "containerName": "useralice"})
        );
    }

    #[test]
    fn test_failure_carries_code_and_output() {
        let err = SandboxError::BuildFailed {
            step: "compile".into(),
            diagnostics: Diagnostics::new("Compiling", "error[E0425]"),
        };
        let value = ActionReply::failure(&err).into_value();
        assert_eq!(value["success"], false);
        assert_eq!(value["code"], "BUILD_FAILED");
        assert_eq!(value["step"], "compile");
        assert_eq!(value["stderr"], "error[E0425]");
        assert_eq!(value["output"], "Compilingerror[E0425]");
    }

    #[test]
    fn test_failure_without_diagnostics() {
        let value = ActionReply::failure(&SandboxError::ProjectRequired).into_value();
        assert_eq!(
            value,
            json!({"success": false, "error": "Please select a project", "code": "PROJECT_REQUIRED"})
        );
    }
}
