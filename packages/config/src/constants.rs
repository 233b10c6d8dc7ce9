// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Sorobox

// Port Configuration
pub const SOROBOX_API_PORT: &str = "SOROBOX_API_PORT";
pub const PORT: &str = "PORT"; // Legacy
pub const SOROBOX_LSP_PORT: &str = "SOROBOX_LSP_PORT";

// CORS Configuration
pub const SOROBOX_CORS_ORIGIN: &str = "SOROBOX_CORS_ORIGIN";
pub const CORS_ORIGIN: &str = "CORS_ORIGIN"; // Legacy

// Sandbox Containers
pub const SOROBOX_SANDBOX_IMAGE: &str = "SOROBOX_SANDBOX_IMAGE";
pub const SOROBOX_CONTAINER_PREFIX: &str = "SOROBOX_CONTAINER_PREFIX";
pub const SOROBOX_WORKSPACE_ROOT: &str = "SOROBOX_WORKSPACE_ROOT";
pub const SOROBOX_CREDENTIAL_HOME: &str = "SOROBOX_CREDENTIAL_HOME";
pub const SOROBOX_CONTAINER_USER: &str = "SOROBOX_CONTAINER_USER";
pub const SOROBOX_DEFAULT_PROJECT: &str = "SOROBOX_DEFAULT_PROJECT";
pub const SOROBOX_STARTUP_ATTEMPTS: &str = "SOROBOX_STARTUP_ATTEMPTS";
pub const SOROBOX_STARTUP_INTERVAL_MS: &str = "SOROBOX_STARTUP_INTERVAL_MS";
pub const SOROBOX_DOCKER_BIN: &str = "SOROBOX_DOCKER_BIN";

// Toolchain
pub const SOROBOX_STELLAR_BIN: &str = "SOROBOX_STELLAR_BIN";
pub const SOROBOX_CARGO_BIN: &str = "SOROBOX_CARGO_BIN";
pub const SOROBOX_WASM_TARGET: &str = "SOROBOX_WASM_TARGET";
pub const SOROBOX_ARTIFACT_NAME: &str = "SOROBOX_ARTIFACT_NAME";
pub const SOROBOX_CONTRACT_BUILD_TIMEOUT_SECS: &str = "SOROBOX_CONTRACT_BUILD_TIMEOUT_SECS";
pub const SOROBOX_COMPILE_TIMEOUT_SECS: &str = "SOROBOX_COMPILE_TIMEOUT_SECS";
pub const SOROBOX_DEPLOY_TIMEOUT_SECS: &str = "SOROBOX_DEPLOY_TIMEOUT_SECS";
pub const SOROBOX_MAX_OUTPUT_BYTES: &str = "SOROBOX_MAX_OUTPUT_BYTES";
pub const SOROBOX_MAX_FILE_BYTES: &str = "SOROBOX_MAX_FILE_BYTES";
pub const SOROBOX_MAX_ARTIFACT_BYTES: &str = "SOROBOX_MAX_ARTIFACT_BYTES";

// Network
pub const SOROBOX_NETWORK: &str = "SOROBOX_NETWORK";
pub const SOROBOX_RPC_URL: &str = "SOROBOX_RPC_URL";
pub const SOROBOX_HORIZON_URL: &str = "SOROBOX_HORIZON_URL";
pub const SOROBOX_NETWORK_PASSPHRASE: &str = "SOROBOX_NETWORK_PASSPHRASE";
pub const SOROBOX_SOURCE_ACCOUNT: &str = "SOROBOX_SOURCE_ACCOUNT";
pub const SOROBOX_POLL_INTERVAL_MS: &str = "SOROBOX_POLL_INTERVAL_MS";
pub const SOROBOX_POLL_MAX_ATTEMPTS: &str = "SOROBOX_POLL_MAX_ATTEMPTS";
pub const SOROBOX_POLL_PROGRESS_EVERY: &str = "SOROBOX_POLL_PROGRESS_EVERY";
pub const SOROBOX_SIGNATURE_TIMEOUT_SECS: &str = "SOROBOX_SIGNATURE_TIMEOUT_SECS";
pub const SOROBOX_HTTP_TIMEOUT_SECS: &str = "SOROBOX_HTTP_TIMEOUT_SECS";
pub const SOROBOX_HTTP_CONNECT_TIMEOUT_SECS: &str = "SOROBOX_HTTP_CONNECT_TIMEOUT_SECS";

// Language Server Bridge
pub const SOROBOX_LSP_BINARY: &str = "SOROBOX_LSP_BINARY";
pub const SOROBOX_LSP_WORKDIR: &str = "SOROBOX_LSP_WORKDIR";
pub const SOROBOX_LSP_KEEPALIVE_SECS: &str = "SOROBOX_LSP_KEEPALIVE_SECS";
pub const SOROBOX_LSP_ALLOW_DISCOVERY: &str = "SOROBOX_LSP_ALLOW_DISCOVERY";

// SSE Stream Configuration
pub const SOROBOX_SSE_MAX_CONNECTIONS_PER_USER: &str = "SOROBOX_SSE_MAX_CONNECTIONS_PER_USER";
