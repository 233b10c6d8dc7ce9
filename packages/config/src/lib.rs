// ABOUTME: Configuration crate for Sorobox
// ABOUTME: Exposes environment variable names and the typed Settings loader

pub mod constants;
pub mod settings;

pub use settings::{
    load_dotenv, ConfigError, EventSettings, LspSettings, NetworkSettings, SandboxSettings,
    ServerSettings, Settings, ToolchainSettings,
};
