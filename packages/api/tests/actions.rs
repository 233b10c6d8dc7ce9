// ABOUTME: HTTP-level tests for the action endpoint, event stream and health route
// ABOUTME: Docker is scripted and the ledger is faked so the full router runs in-process

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sorobox_api::{create_router, AppState};
use sorobox_config::Settings;
use sorobox_sandbox::test_utils::ScriptedRunner;
use sorobox_sandbox::{
    BalanceSource, Diagnostics, EventBus, EventKind, LedgerClient, LedgerContext, SandboxError,
    SandboxEvent, SandboxManager, SignedTransaction, Submission, TxStatus, UnsignedTransaction,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;

const CONTRACT: &str = "CDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC";
const WALLET: &str = "GDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC";
const WASM: &[u8] = b"\0asm\x01\0\0\0";

/// Every transaction lands on the first poll
#[derive(Default)]
struct InstantLedger {
    submitted: Mutex<Vec<String>>,
    /// Stderr of a failing upload simulation
    upload_rejection: Mutex<Option<String>>,
}

#[async_trait]
impl LedgerClient for InstantLedger {
    async fn build_upload(
        &self,
        _ctx: &LedgerContext,
        wasm_path: &str,
    ) -> sorobox_sandbox::Result<UnsignedTransaction> {
        if let Some(stderr) = self.upload_rejection.lock().unwrap().clone() {
            return Err(SandboxError::DeployFailed {
                message: "simulating transaction: exit code 1".into(),
                diagnostics: Diagnostics::new("", stderr),
            });
        }
        Ok(UnsignedTransaction {
            xdr: format!("upload:{}", wasm_path),
        })
    }

    async fn build_create(
        &self,
        _ctx: &LedgerContext,
        wasm_hash: &str,
        _salt_hex: &str,
    ) -> sorobox_sandbox::Result<UnsignedTransaction> {
        Ok(UnsignedTransaction {
            xdr: format!("create:{}", wasm_hash),
        })
    }

    async fn submit(&self, signed: &SignedTransaction) -> sorobox_sandbox::Result<Submission> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(signed.xdr.clone());
        Ok(Submission {
            hash: format!("{:064x}", submitted.len()),
        })
    }

    async fn transaction_status(&self, _hash: &str) -> sorobox_sandbox::Result<TxStatus> {
        Ok(TxStatus::Success { return_value: None })
    }

    async fn contract_id(
        &self,
        _ctx: &LedgerContext,
        _salt_hex: &str,
    ) -> sorobox_sandbox::Result<String> {
        Ok(CONTRACT.to_string())
    }

    fn network_passphrase(&self) -> &str {
        "Test SDF Network ; September 2015"
    }
}

struct NoBalances;

#[async_trait]
impl BalanceSource for NoBalances {
    async fn native_balance(&self, _address: &str) -> Result<Option<String>, String> {
        Ok(None)
    }
}

struct TestApp {
    router: Router,
    runner: Arc<ScriptedRunner>,
    events: EventBus,
    ledger: Arc<InstantLedger>,
}

/// Alice has a running sandbox whose project builds and leaves an artifact
fn app_with(configure: impl FnOnce(&mut Settings)) -> TestApp {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on(&["{{.State.Running}}"], ScriptedRunner::ok("true"));
    runner.on(&["base64"], ScriptedRunner::ok(&STANDARD.encode(WASM)));

    let mut settings = Settings::default();
    settings.sandbox.startup_interval = Duration::from_millis(1);
    settings.network.poll_interval = Duration::from_millis(1);
    configure(&mut settings);

    let events = EventBus::default();
    let manager = Arc::new(SandboxManager::new(
        runner.clone(),
        settings.sandbox.clone(),
        settings.toolchain.stellar_bin.clone(),
        events.clone(),
    ));
    let ledger = Arc::new(InstantLedger::default());
    let state = AppState::assemble(settings, manager, ledger.clone(), Arc::new(NoBalances));
    TestApp {
        router: create_router(state),
        runner,
        events,
        ledger,
    }
}

fn app() -> TestApp {
    app_with(|_| {})
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn post(router: &Router, body: Value) -> (StatusCode, Value) {
    post_raw(router, body.to_string()).await
}

async fn post_raw(router: &Router, body: String) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/docker")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    send(router, request).await
}

async fn next_signature_request(rx: &mut broadcast::Receiver<SandboxEvent>) -> (String, String) {
    loop {
        let event = rx.recv().await.unwrap();
        if let EventKind::SignatureRequested {
            request_id, phase, ..
        } = event.kind
        {
            assert_eq!(event.user_id, "alice");
            return (request_id, phase);
        }
    }
}

#[tokio::test]
async fn test_create_sandbox() {
    let app = app();
    app.runner
        .on(&["{{.Name}}"], ScriptedRunner::fail(1, "Error: No such object"));

    let (status, body) = post(&app.router, json!({"action": "create", "userId": "alice"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["containerName"], "useralice");
    assert_eq!(app.runner.calls_matching(&["run", "-d"]).len(), 1);
}

#[tokio::test]
async fn test_actions_alias_route() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/actions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"action": "checkHealth", "userId": "alice"}).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn test_missing_project_is_a_structured_failure() {
    let app = app();
    let (status, body) = post(
        &app.router,
        json!({"action": "getFileContent", "userId": "alice", "filePath": "src/lib.rs"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "PROJECT_REQUIRED");
}

#[tokio::test]
async fn test_parent_segments_stay_inside_project() {
    let app = app();
    let (status, body) = post(
        &app.router,
        json!({
            "action": "getFileContent",
            "userId": "alice",
            "projectName": "hello",
            "filePath": "../../etc/passwd"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let reads = app.runner.calls_matching(&["base64"]);
    assert_eq!(
        reads[0].argv().last().copied(),
        Some("/home/developer/workspace/hello/etc/passwd")
    );
}

#[tokio::test]
async fn test_get_file_content_returns_text() {
    let app = app();
    app.runner.on(
        &["base64"],
        ScriptedRunner::ok(&STANDARD.encode("#![no_std]\n")),
    );
    let (_, body) = post(
        &app.router,
        json!({
            "action": "getFileContent",
            "userId": "alice",
            "projectName": "hello",
            "filePath": "src/lib.rs"
        }),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["content"], "#![no_std]\n");
    assert!(body.get("encoding").is_none());
}

#[tokio::test]
async fn test_bad_requests() {
    let app = app();

    let (status, body) = post(&app.router, json!({"action": "launchMissiles", "userId": "a"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Unknown action", "action": "launchMissiles"}));

    let (status, _) = post_raw(&app.router, "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(
        &app.router,
        json!({
            "action": "createFile",
            "userId": "alice",
            "projectName": "hello",
            "filePath": "a.bin",
            "content": "%%%",
            "encoding": "base64"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("base64"));
    assert!(app.runner.calls().is_empty());
}

#[tokio::test]
async fn test_build_failure_carries_compiler_output() {
    let app = app();
    app.runner.on(
        &["cargo", "build"],
        ScriptedRunner::fail(101, "error[E0425]: cannot find value `x`"),
    );
    let (status, body) = post(
        &app.router,
        json!({"action": "buildContract", "userId": "alice", "projectName": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "BUILD_FAILED");
    assert_eq!(body["step"], "compile");
    assert!(body["stderr"].as_str().unwrap().contains("E0425"));
}

#[tokio::test]
async fn test_build_returns_wasm() {
    let app = app();
    app.runner
        .on(&["stat", "-c", "%s"], ScriptedRunner::ok(&WASM.len().to_string()));
    let (_, body) = post(
        &app.router,
        json!({"action": "buildContract", "userId": "alice", "projectName": "hello"}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["wasmBase64"], STANDARD.encode(WASM));
    assert_eq!(body["wasmSize"], WASM.len());
}

#[tokio::test]
async fn test_wallet_deploy_through_submit_signature() {
    let app = app();
    let mut rx = app.events.subscribe();

    let router = app.router.clone();
    let deploy = tokio::spawn(async move {
        post(
            &router,
            json!({
                "action": "deployContract",
                "userId": "alice",
                "projectName": "hello",
                "walletAddress": WALLET,
                "useExistingBuild": true
            }),
        )
        .await
    });

    for expected in ["upload", "create"] {
        let (request_id, phase) = next_signature_request(&mut rx).await;
        assert_eq!(phase, expected);

        // Another user cannot answer alice's request
        let (_, body) = post(
            &app.router,
            json!({
                "action": "submitSignature",
                "userId": "mallory",
                "requestId": request_id,
                "signedXdr": "forged"
            }),
        )
        .await;
        assert_eq!(body["code"], "SIGNATURE_REJECTED");

        let (_, body) = post(
            &app.router,
            json!({
                "action": "submitSignature",
                "userId": "alice",
                "requestId": request_id,
                "signedXdr": format!("signed-{}", expected)
            }),
        )
        .await;
        assert_eq!(body["success"], true);
        assert_eq!(body["requestId"], request_id.as_str());
    }

    let (status, body) = deploy.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["contractId"], CONTRACT);
    assert_eq!(body["phases"].as_array().unwrap().len(), 2);
    assert_eq!(
        *app.ledger.submitted.lock().unwrap(),
        vec!["signed-upload".to_string(), "signed-create".to_string()]
    );
}

#[tokio::test]
async fn test_wallet_deploy_rejection_reports_failed_phase() {
    let app = app();
    let mut rx = app.events.subscribe();

    let router = app.router.clone();
    let deploy = tokio::spawn(async move {
        post(
            &router,
            json!({
                "action": "deployContract",
                "userId": "alice",
                "projectName": "hello",
                "walletAddress": WALLET,
                "useExistingBuild": true
            }),
        )
        .await
    });

    let (request_id, _) = next_signature_request(&mut rx).await;
    post(
        &app.router,
        json!({
            "action": "submitSignature",
            "userId": "alice",
            "requestId": request_id,
            "reason": "Not today"
        }),
    )
    .await;

    let (status, body) = deploy.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "DEPLOY_FAILED");
    assert!(body["error"].as_str().unwrap().contains("Not today"));
    assert!(app.ledger.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_wallet_deploy_failure_carries_tool_output() {
    let app = app();
    *app.ledger.upload_rejection.lock().unwrap() =
        Some("error: HostError: Error(Budget, ExceededLimit)".to_string());

    let (status, body) = post(
        &app.router,
        json!({
            "action": "deployContract",
            "userId": "alice",
            "projectName": "hello",
            "walletAddress": WALLET,
            "useExistingBuild": true
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "DEPLOY_FAILED");
    assert_eq!(body["stderr"], "error: HostError: Error(Budget, ExceededLimit)");
    assert_eq!(
        body["phases"][0]["diagnostics"]["stderr"],
        "error: HostError: Error(Budget, ExceededLimit)"
    );
    assert_eq!(body["phases"][1]["status"], "skipped");
    assert!(app.ledger.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_event_stream_requires_user() {
    let app = app();
    let request = Request::builder()
        .uri("/api/events")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "userId is required");
}

#[tokio::test]
async fn test_event_stream_caps_connections_per_user() {
    let app = app_with(|s| s.events.max_connections_per_user = 1);
    let open = || {
        Request::builder()
            .uri("/api/events?userId=alice")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.router.clone().oneshot(open()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let second = app.router.clone().oneshot(open()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    drop(first);
    let third = app.router.clone().oneshot(open()).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["network"], "testnet");
    assert_eq!(body["pendingSignatures"], 0);
    assert!(app.runner.calls().is_empty());
}
