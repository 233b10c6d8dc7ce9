// ABOUTME: WebSocket listener that opens one language server session per connection
// ABOUTME: Sessions are registered so shutdown can close them and wait for their processes

use crate::bridge::{close_message, run_bridge, BridgeConfig, CLOSE_INTERNAL_ERROR};
use crate::discovery::Discovery;
use crate::launcher::{DockerLauncher, LanguageServerLauncher};
use crate::message::InitializeOverrides;
use crate::session::SessionRegistry;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use sorobox_config::LspSettings;
use sorobox_sandbox::SandboxManager;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Time allowed for sessions to dispose after shutdown is requested
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct LspState {
    pub discovery: Arc<Discovery>,
    pub launcher: Arc<dyn LanguageServerLauncher>,
    pub sessions: SessionRegistry,
}

impl LspState {
    pub fn new(manager: Arc<SandboxManager>, settings: LspSettings) -> Self {
        let launcher = Arc::new(DockerLauncher::new(manager.clone(), settings.binary.clone()));
        Self::with_launcher(manager, settings, launcher)
    }

    pub fn with_launcher(
        manager: Arc<SandboxManager>,
        settings: LspSettings,
        launcher: Arc<dyn LanguageServerLauncher>,
    ) -> Self {
        Self {
            discovery: Arc::new(Discovery::new(manager, settings)),
            launcher,
            sessions: SessionRegistry::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub project_name: Option<String>,
}

pub fn router(state: LspState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/lsp", get(upgrade))
        .with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<LspState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: ConnectParams, state: LspState) {
    let (mut sink, stream) = socket.split();
    let user_id = params.user_id.as_deref();

    let target = match state
        .discovery
        .resolve(user_id, params.project_name.as_deref())
        .await
    {
        Ok(target) => target,
        Err(e) => {
            warn!(?user_id, code = e.code(), "Language server session refused: {}", e);
            let _ = sink.send(close_message(CLOSE_INTERNAL_ERROR, e.to_string())).await;
            return;
        }
    };

    let server = match state
        .launcher
        .launch(&target.container, &target.workdir)
        .await
    {
        Ok(server) => server,
        Err(e) => {
            warn!(container = %target.container, "Failed to start language server: {}", e);
            let _ = sink.send(close_message(CLOSE_INTERNAL_ERROR, e.to_string())).await;
            return;
        }
    };

    let guard = state.sessions.open(user_id, &target.container);
    let config = BridgeConfig {
        keepalive_interval: state.discovery.settings().keepalive_interval,
        overrides: InitializeOverrides::new(target.workdir.clone()),
    };
    let reason = run_bridge(
        stream,
        sink,
        server,
        config,
        state.sessions.shutdown_receiver(),
    )
    .await;
    guard.dispose(reason);
}

/// Serve until `shutdown` resolves, then close every session and wait for them
pub async fn serve<F>(listener: TcpListener, state: LspState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sessions = state.sessions.clone();
    let closing = sessions.clone();

    if let Ok(addr) = listener.local_addr() {
        info!("Language server bridge listening on ws://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            closing.close_all();
        })
        .await?;

    if !sessions.drain(DRAIN_TIMEOUT).await {
        warn!(remaining = sessions.len(), "Language server sessions still open at exit");
    }
    info!("Language server bridge stopped");
    Ok(())
}
