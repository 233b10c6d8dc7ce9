// ABOUTME: WebSocket to stdio bridge for language servers running inside user sandboxes
// ABOUTME: One connection maps to one language server process for the session's lifetime

pub mod bridge;
pub mod discovery;
pub mod framing;
pub mod launcher;
pub mod message;
pub mod server;
pub mod session;

pub use bridge::{run_bridge, BridgeConfig, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR};
pub use discovery::{Discovery, SessionTarget};
pub use framing::{read_message, write_message, FramingError};
pub use launcher::{DockerLauncher, LanguageServer, LanguageServerLauncher, ProcessHandle};
pub use message::{prepare_client_message, rewrite_initialize, InitializeOverrides};
pub use server::{router, serve, ConnectParams, LspState};
pub use session::{DisposeReason, SessionGuard, SessionInfo, SessionRegistry};
