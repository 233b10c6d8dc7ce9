// ABOUTME: Forwards JSON-RPC messages between one WebSocket client and one language server
// ABOUTME: Preserves order in both directions, pings the client and reports why the session ended

use crate::framing::{read_message, write_message};
use crate::launcher::LanguageServer;
use crate::message::{prepare_client_message, InitializeOverrides};
use crate::session::DisposeReason;
use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::io::{AsyncWrite, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// WebSocket close code for a server going away
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code for an unexpected server condition
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Unanswered pings tolerated before the client is considered gone
const MAX_MISSED_PONGS: u32 = 2;
const SERVER_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub keepalive_interval: Duration,
    pub overrides: InitializeOverrides,
}

pub fn close_message(code: u16, reason: impl Into<String>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into().into(),
    }))
}

/// Run the session until either side ends it
pub async fn run_bridge<S, K, E>(
    mut client_rx: S,
    mut client_tx: K,
    server: LanguageServer,
    config: BridgeConfig,
    mut shutdown: watch::Receiver<bool>,
) -> DisposeReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    K: Sink<Message> + Unpin,
    K::Error: Display,
    E: Display,
{
    let (stdin, stdout, mut process) = server.into_parts();

    let (server_tx, mut server_rx) = mpsc::channel::<Vec<u8>>(SERVER_QUEUE);
    let reader = tokio::spawn(async move {
        let mut stdout = BufReader::new(stdout);
        loop {
            match read_message(&mut stdout).await {
                Ok(Some(body)) => {
                    if server_tx.send(body).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Language server closed stdout");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read from language server: {}", e);
                    break;
                }
            }
        }
    });

    let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(SERVER_QUEUE);
    let writer = tokio::spawn(write_to_server(stdin, stdin_rx));

    let mut keepalive = interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed_pongs = 0u32;
    // Client message waiting for room in a full stdin queue; client reads pause meanwhile
    let mut backlog: Option<Vec<u8>> = None;

    let reason = if *shutdown.borrow() {
        DisposeReason::Shutdown
    } else {
        loop {
            tokio::select! {
                permit = stdin_tx.reserve(), if backlog.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(body) = backlog.take() {
                            permit.send(body);
                        }
                    }
                    Err(_) => break DisposeReason::ServerExited,
                },
                frame = client_rx.next(), if backlog.is_none() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let body = prepare_client_message(text.as_str().as_bytes(), &config.overrides);
                        match queue_for_server(&stdin_tx, body) {
                            Ok(pending) => backlog = pending,
                            Err(()) => break DisposeReason::ServerExited,
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let body = prepare_client_message(&data, &config.overrides);
                        match queue_for_server(&stdin_tx, body) {
                            Ok(pending) => backlog = pending,
                            Err(()) => break DisposeReason::ServerExited,
                        }
                    }
                    Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                    // Pings are answered by the WebSocket layer
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break DisposeReason::ClientClosed,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break DisposeReason::ClientError;
                    }
                },
                body = server_rx.recv() => match body {
                    Some(body) => {
                        let text = match String::from_utf8(body) {
                            Ok(text) => text,
                            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
                        };
                        if let Err(e) = client_tx.send(Message::Text(text.into())).await {
                            warn!("Failed to send to WebSocket client: {}", e);
                            break DisposeReason::ClientError;
                        }
                    }
                    None => {
                        let _ = client_tx
                            .send(close_message(CLOSE_INTERNAL_ERROR, "Language server exited"))
                            .await;
                        break DisposeReason::ServerExited;
                    }
                },
                _ = keepalive.tick() => {
                    if missed_pongs >= MAX_MISSED_PONGS {
                        break DisposeReason::KeepaliveExpired;
                    }
                    missed_pongs += 1;
                    if client_tx.send(Message::Ping(Default::default())).await.is_err() {
                        break DisposeReason::ClientError;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break DisposeReason::Shutdown;
                    }
                }
            }
        }
    };

    if reason == DisposeReason::Shutdown {
        let _ = client_tx
            .send(close_message(CLOSE_GOING_AWAY, "Server shutting down"))
            .await;
    }
    let _ = client_tx.close().await;

    drop(stdin_tx);
    reader.abort();
    writer.abort();
    process.kill().await;
    reason
}

/// Queue a body for the server without waiting. A full queue hands the body back.
fn queue_for_server(
    tx: &mpsc::Sender<Vec<u8>>,
    body: Vec<u8>,
) -> Result<Option<Vec<u8>>, ()> {
    match tx.try_send(body) {
        Ok(()) => Ok(None),
        Err(TrySendError::Full(body)) => {
            debug!("Language server input queue is full, pausing client reads");
            Ok(Some(body))
        }
        Err(TrySendError::Closed(_)) => Err(()),
    }
}

async fn write_to_server<W>(mut stdin: W, mut bodies: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(body) = bodies.recv().await {
        if let Err(e) = write_message(&mut stdin, &body).await {
            warn!("Failed to write to language server: {}", e);
            break;
        }
    }
}
