// ABOUTME: Entry point for the Sorobox server binary
// ABOUTME: Runs the action API, the language server bridge, or both until a shutdown signal

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sorobox_api::{create_router, AppState};
use sorobox_config::{load_dotenv, Settings};
use sorobox_lsp::LspState;
use sorobox_sandbox::EventBus;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sorobox")]
#[command(about = "Soroban sandbox orchestration and editor bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run the HTTP action API and event stream
    Serve {
        /// Overrides SOROBOX_API_PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the language server WebSocket bridge
    Lsp {
        /// Overrides SOROBOX_LSP_PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run both servers (default)
    Up {
        #[arg(long)]
        api_port: Option<u16>,
        #[arg(long)]
        lsp_port: Option<u16>,
    },
}

impl Command {
    fn apply(&self, settings: &mut Settings) {
        match *self {
            Command::Serve { port } => {
                if let Some(port) = port {
                    settings.server.port = port;
                }
            }
            Command::Lsp { port } => {
                if let Some(port) = port {
                    settings.lsp.port = port;
                }
            }
            Command::Up { api_port, lsp_port } => {
                if let Some(port) = api_port {
                    settings.server.port = port;
                }
                if let Some(port) = lsp_port {
                    settings.lsp.port = port;
                }
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// A future that completes once the shared shutdown flag flips
fn wait_for(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        // A dropped sender also means shutdown
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

async fn bind(port: u16, what: &str) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {} on {}", what, addr))
}

async fn run_api(state: AppState, port: u16, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = bind(port, "action API").await?;
    info!("Action API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(wait_for(shutdown))
        .await
        .context("action API server failed")?;
    info!("Action API stopped");
    Ok(())
}

async fn run_lsp(state: LspState, port: u16, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = bind(port, "language server bridge").await?;
    sorobox_lsp::serve(listener, state, wait_for(shutdown))
        .await
        .context("language server bridge failed")?;
    info!("Language server bridge stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    load_dotenv();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Up {
        api_port: None,
        lsp_port: None,
    });

    let mut settings = Settings::from_env().context("invalid configuration")?;
    command.apply(&mut settings);
    info!(
        network = %settings.network.network,
        image = %settings.sandbox.image,
        "Starting Sorobox {}",
        env!("CARGO_PKG_VERSION")
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let api_port = settings.server.port;
    let lsp_port = settings.lsp.port;
    let lsp_settings = settings.lsp.clone();
    let state = AppState::from_settings(settings, EventBus::default())
        .context("Failed to initialise sandbox services")?;

    match command {
        Command::Serve { .. } => run_api(state, api_port, stop_rx).await,
        Command::Lsp { .. } => {
            let lsp = LspState::new(state.manager.clone(), lsp_settings);
            run_lsp(lsp, lsp_port, stop_rx).await
        }
        Command::Up { .. } => {
            let lsp = LspState::new(state.manager.clone(), lsp_settings);
            tokio::try_join!(
                run_api(state, api_port, stop_rx.clone()),
                run_lsp(lsp, lsp_port, stop_rx),
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_subcommand_means_up() {
        let cli = Cli::try_parse_from(["sorobox"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_port_overrides() {
        let cli = Cli::try_parse_from(["sorobox", "up", "--api-port", "9000", "--lsp-port", "9001"])
            .unwrap();
        let mut settings = Settings::default();
        cli.command.unwrap().apply(&mut settings);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.lsp.port, 9001);

        let cli = Cli::try_parse_from(["sorobox", "lsp"]).unwrap();
        let mut settings = Settings::default();
        let before = settings.clone();
        cli.command.unwrap().apply(&mut settings);
        assert_eq!(settings, before);
    }
}
