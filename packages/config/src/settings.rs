// ABOUTME: Typed runtime settings assembled from environment variables
// ABOUTME: Groups server, sandbox, toolchain, network, LSP and event-stream options with defaults

use crate::constants::*;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("{0} must be greater than zero")]
    MustBePositive(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub port: u16,
    pub cors_origin: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub docker_bin: String,
    pub image: String,
    /// Container name is `{container_prefix}{user_id}`
    pub container_prefix: String,
    pub workspace_root: String,
    /// Value of STELLAR_HOME inside the container
    pub credential_home: String,
    pub container_user: String,
    pub default_project: String,
    pub startup_attempts: u32,
    pub startup_interval: Duration,
    pub init_timeout: Duration,
    pub stop_timeout: Duration,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolchainSettings {
    pub stellar_bin: String,
    pub cargo_bin: String,
    pub wasm_target: String,
    pub artifact_name: String,
    pub contract_build_timeout: Duration,
    pub compile_timeout: Duration,
    pub deploy_timeout: Duration,
    pub clean_timeout: Duration,
    pub max_output_bytes: usize,
    pub max_file_bytes: usize,
    pub max_artifact_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    pub network: String,
    pub rpc_url: String,
    pub horizon_url: String,
    pub passphrase: String,
    pub source_account: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub poll_progress_every: u32,
    pub signature_timeout: Duration,
    /// Whole-request timeout for RPC and Horizon calls
    pub http_timeout: Duration,
    pub http_connect_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LspSettings {
    pub port: u16,
    pub binary: String,
    pub workdir: String,
    pub keepalive_interval: Duration,
    /// Permit first-match container discovery when a connection names no user
    pub allow_discovery: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSettings {
    pub max_connections_per_user: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub server: ServerSettings,
    pub sandbox: SandboxSettings,
    pub toolchain: ToolchainSettings,
    pub network: NetworkSettings,
    pub lsp: LspSettings,
    pub events: EventSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 4001,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            image: "stellar-sandbox:v1".to_string(),
            container_prefix: "user".to_string(),
            workspace_root: "/home/developer/workspace".to_string(),
            credential_home: "/home/developer/workspace/.stellar".to_string(),
            container_user: "developer".to_string(),
            default_project: "soroban-hello-world".to_string(),
            startup_attempts: 10,
            startup_interval: Duration::from_millis(500),
            init_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            stellar_bin: "stellar".to_string(),
            cargo_bin: "cargo".to_string(),
            wasm_target: "wasm32v1-none".to_string(),
            artifact_name: "hello_world.wasm".to_string(),
            contract_build_timeout: Duration::from_secs(120),
            compile_timeout: Duration::from_secs(300),
            deploy_timeout: Duration::from_secs(120),
            clean_timeout: Duration::from_secs(60),
            max_output_bytes: 10 * 1024 * 1024,
            max_file_bytes: 10 * 1024 * 1024,
            max_artifact_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            network: "testnet".to_string(),
            rpc_url: "https://soroban-testnet.stellar.org".to_string(),
            horizon_url: "https://horizon-testnet.stellar.org".to_string(),
            passphrase: "Test SDF Network ; September 2015".to_string(),
            source_account: "darshan".to_string(),
            poll_interval: Duration::from_millis(1000),
            poll_max_attempts: 60,
            poll_progress_every: 10,
            signature_timeout: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            http_connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for LspSettings {
    fn default() -> Self {
        Self {
            port: 3001,
            binary: "rust-analyzer".to_string(),
            workdir: "/home/developer/workspace".to_string(),
            keepalive_interval: Duration::from_secs(30),
            allow_discovery: false,
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            max_connections_per_user: 3,
        }
    }
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);
        let defaults = Settings::default();

        let port = env
            .get(SOROBOX_API_PORT)
            .or_else(|| env.get(PORT))
            .map(|v| parse_value::<u16>(SOROBOX_API_PORT, &v))
            .transpose()?
            .unwrap_or(defaults.server.port);
        validate_port(port)?;

        let lsp_port = env.parse_or(SOROBOX_LSP_PORT, defaults.lsp.port)?;
        validate_port(lsp_port)?;

        let server = ServerSettings {
            port,
            cors_origin: env
                .get(SOROBOX_CORS_ORIGIN)
                .or_else(|| env.get(CORS_ORIGIN))
                .unwrap_or(defaults.server.cors_origin),
        };

        let d = defaults.sandbox;
        let workspace_root = env.string_or(SOROBOX_WORKSPACE_ROOT, &d.workspace_root);
        let sandbox = SandboxSettings {
            docker_bin: env.string_or(SOROBOX_DOCKER_BIN, &d.docker_bin),
            image: env.string_or(SOROBOX_SANDBOX_IMAGE, &d.image),
            container_prefix: env.string_or(SOROBOX_CONTAINER_PREFIX, &d.container_prefix),
            credential_home: env.get(SOROBOX_CREDENTIAL_HOME).unwrap_or_else(|| {
                format!("{}/.stellar", workspace_root.trim_end_matches('/'))
            }),
            workspace_root,
            container_user: env.string_or(SOROBOX_CONTAINER_USER, &d.container_user),
            default_project: env.string_or(SOROBOX_DEFAULT_PROJECT, &d.default_project),
            startup_attempts: env.positive_or(SOROBOX_STARTUP_ATTEMPTS, d.startup_attempts)?,
            startup_interval: env.millis_or(SOROBOX_STARTUP_INTERVAL_MS, d.startup_interval)?,
            init_timeout: d.init_timeout,
            stop_timeout: d.stop_timeout,
            command_timeout: d.command_timeout,
        };

        let d = defaults.toolchain;
        let toolchain = ToolchainSettings {
            stellar_bin: env.string_or(SOROBOX_STELLAR_BIN, &d.stellar_bin),
            cargo_bin: env.string_or(SOROBOX_CARGO_BIN, &d.cargo_bin),
            wasm_target: env.string_or(SOROBOX_WASM_TARGET, &d.wasm_target),
            artifact_name: env.string_or(SOROBOX_ARTIFACT_NAME, &d.artifact_name),
            contract_build_timeout: env
                .secs_or(SOROBOX_CONTRACT_BUILD_TIMEOUT_SECS, d.contract_build_timeout)?,
            compile_timeout: env.secs_or(SOROBOX_COMPILE_TIMEOUT_SECS, d.compile_timeout)?,
            deploy_timeout: env.secs_or(SOROBOX_DEPLOY_TIMEOUT_SECS, d.deploy_timeout)?,
            clean_timeout: d.clean_timeout,
            max_output_bytes: env.positive_or(SOROBOX_MAX_OUTPUT_BYTES, d.max_output_bytes)?,
            max_file_bytes: env.positive_or(SOROBOX_MAX_FILE_BYTES, d.max_file_bytes)?,
            max_artifact_bytes: env
                .positive_or(SOROBOX_MAX_ARTIFACT_BYTES, d.max_artifact_bytes)?,
        };

        let d = defaults.network;
        let network = NetworkSettings {
            network: env.string_or(SOROBOX_NETWORK, &d.network),
            rpc_url: env.string_or(SOROBOX_RPC_URL, &d.rpc_url),
            horizon_url: env.string_or(SOROBOX_HORIZON_URL, &d.horizon_url),
            passphrase: env.string_or(SOROBOX_NETWORK_PASSPHRASE, &d.passphrase),
            source_account: env.string_or(SOROBOX_SOURCE_ACCOUNT, &d.source_account),
            poll_interval: env.millis_or(SOROBOX_POLL_INTERVAL_MS, d.poll_interval)?,
            poll_max_attempts: env.positive_or(SOROBOX_POLL_MAX_ATTEMPTS, d.poll_max_attempts)?,
            poll_progress_every: env
                .positive_or(SOROBOX_POLL_PROGRESS_EVERY, d.poll_progress_every)?,
            signature_timeout: env.secs_or(SOROBOX_SIGNATURE_TIMEOUT_SECS, d.signature_timeout)?,
            http_timeout: env.secs_or(SOROBOX_HTTP_TIMEOUT_SECS, d.http_timeout)?,
            http_connect_timeout: env
                .secs_or(SOROBOX_HTTP_CONNECT_TIMEOUT_SECS, d.http_connect_timeout)?,
        };

        let d = defaults.lsp;
        let lsp = LspSettings {
            port: lsp_port,
            binary: env.string_or(SOROBOX_LSP_BINARY, &d.binary),
            workdir: env.string_or(SOROBOX_LSP_WORKDIR, &d.workdir),
            keepalive_interval: env.secs_or(SOROBOX_LSP_KEEPALIVE_SECS, d.keepalive_interval)?,
            allow_discovery: env.parse_or(SOROBOX_LSP_ALLOW_DISCOVERY, d.allow_discovery)?,
        };

        let max_connections_per_user = env.positive_or(
            SOROBOX_SSE_MAX_CONNECTIONS_PER_USER,
            defaults.events.max_connections_per_user,
        )?;
        if max_connections_per_user > 100 {
            return Err(ConfigError::InvalidValue {
                key: SOROBOX_SSE_MAX_CONNECTIONS_PER_USER.to_string(),
                value: max_connections_per_user.to_string(),
                reason: "must be at most 100".to_string(),
            });
        }

        let settings = Settings {
            server,
            sandbox,
            toolchain,
            network,
            lsp,
            events: EventSettings {
                max_connections_per_user,
            },
        };
        debug!(?settings, "Loaded settings");
        Ok(settings)
    }
}

/// Load a `.env` file if one is present; missing files are fine
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to load .env file: {}", e),
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(v) => parse_value(key, &v),
            None => Ok(default),
        }
    }

    fn positive_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq,
        T::Err: Display,
    {
        let value = self.parse_or(key, default)?;
        if value == T::default() {
            return Err(ConfigError::MustBePositive(key.to_string()));
        }
        Ok(value)
    }

    fn secs_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.positive_or(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.positive_or(key, millis).map(Duration::from_millis)
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn validate_port(port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::PortOutOfRange(port));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn settings_with(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_with(&[]).unwrap();
        assert_eq!(settings.server.port, 4001);
        assert_eq!(settings.lsp.port, 3001);
        assert_eq!(settings.sandbox.image, "stellar-sandbox:v1");
        assert_eq!(settings.sandbox.container_prefix, "user");
        assert_eq!(
            settings.sandbox.credential_home,
            "/home/developer/workspace/.stellar"
        );
        assert_eq!(settings.toolchain.wasm_target, "wasm32v1-none");
        assert_eq!(settings.network.poll_max_attempts, 60);
        assert_eq!(settings.network.poll_progress_every, 10);
        assert!(!settings.lsp.allow_discovery);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_overrides() {
        let settings = settings_with(&[
            (SOROBOX_API_PORT, "8080"),
            (SOROBOX_WORKSPACE_ROOT, "/srv/ws/"),
            (SOROBOX_POLL_INTERVAL_MS, "5"),
            (SOROBOX_LSP_ALLOW_DISCOVERY, "true"),
        ])
        .unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.sandbox.credential_home, "/srv/ws/.stellar");
        assert_eq!(settings.network.poll_interval, Duration::from_millis(5));
        assert!(settings.lsp.allow_discovery);
    }

    #[test]
    fn test_legacy_port_fallback() {
        let settings = settings_with(&[(PORT, "9000")]).unwrap();
        assert_eq!(settings.server.port, 9000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert_eq!(
            settings_with(&[(SOROBOX_API_PORT, "0")]).unwrap_err(),
            ConfigError::PortOutOfRange(0)
        );
        assert!(matches!(
            settings_with(&[(SOROBOX_LSP_PORT, "not-a-port")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            settings_with(&[(SOROBOX_POLL_MAX_ATTEMPTS, "0")]).unwrap_err(),
            ConfigError::MustBePositive(SOROBOX_POLL_MAX_ATTEMPTS.to_string())
        );
        assert!(settings_with(&[(SOROBOX_SSE_MAX_CONNECTIONS_PER_USER, "500")]).is_err());
    }

    #[test]
    fn test_default_matches_empty_environment() {
        let defaults = Settings::default();
        assert_eq!(settings_with(&[]).unwrap(), defaults);
        assert_eq!(defaults.network.http_timeout, Duration::from_secs(30));
        assert_eq!(defaults.network.http_connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_http_timeouts() {
        let settings = settings_with(&[
            (SOROBOX_HTTP_TIMEOUT_SECS, "5"),
            (SOROBOX_HTTP_CONNECT_TIMEOUT_SECS, "2"),
        ])
        .unwrap();
        assert_eq!(settings.network.http_timeout, Duration::from_secs(5));
        assert_eq!(settings.network.http_connect_timeout, Duration::from_secs(2));
        assert_eq!(
            settings_with(&[(SOROBOX_HTTP_TIMEOUT_SECS, "0")]).unwrap_err(),
            ConfigError::MustBePositive(SOROBOX_HTTP_TIMEOUT_SECS.to_string())
        );
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let settings = settings_with(&[(SOROBOX_NETWORK, "   ")]).unwrap();
        assert_eq!(settings.network.network, "testnet");
    }
}
