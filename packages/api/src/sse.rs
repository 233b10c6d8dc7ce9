// ABOUTME: Server-Sent Events stream of sandbox events for one user
// ABOUTME: Connection tracking caps concurrent streams per user and releases slots on drop

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use sorobox_sandbox::SandboxEvent;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Maximum size of one serialized event
pub const MAX_SSE_EVENT_SIZE: usize = 64 * 1024;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub struct SseConnectionLimitExceeded;

/// Tracks concurrent SSE connections per user id
#[derive(Clone)]
pub struct SseConnectionTracker {
    connections: Arc<Mutex<HashMap<String, usize>>>,
    max_connections_per_user: usize,
}

impl SseConnectionTracker {
    pub fn new(max_connections_per_user: usize) -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            max_connections_per_user,
        }
    }

    fn connections(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.connections.lock().unwrap_or_else(|poisoned| {
            warn!("SSE connection tracker mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn try_acquire(&self, user_id: &str) -> Result<SseConnectionGuard, SseConnectionLimitExceeded> {
        let mut connections = self.connections();
        let count = connections.entry(user_id.to_string()).or_insert(0);
        if *count >= self.max_connections_per_user {
            warn!(
                user_id,
                current = *count,
                max = self.max_connections_per_user,
                "SSE connection limit exceeded"
            );
            return Err(SseConnectionLimitExceeded);
        }
        *count += 1;
        info!(user_id, count = *count, "SSE connection acquired");
        Ok(SseConnectionGuard {
            user_id: user_id.to_string(),
            tracker: self.clone(),
        })
    }

    pub fn active(&self, user_id: &str) -> usize {
        self.connections().get(user_id).copied().unwrap_or(0)
    }

    fn release(&self, user_id: &str) {
        let mut connections = self.connections();
        if let Some(count) = connections.get_mut(user_id) {
            *count = count.saturating_sub(1);
            debug!(user_id, remaining = *count, "SSE connection released");
            if *count == 0 {
                connections.remove(user_id);
            }
        }
    }
}

/// Releases the connection slot when the stream is dropped
pub struct SseConnectionGuard {
    user_id: String,
    tracker: SseConnectionTracker,
}

impl Drop for SseConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.user_id);
    }
}

/// Keeps the guard alive exactly as long as the stream
pub struct GuardedSseStream<S> {
    stream: std::pin::Pin<Box<S>>,
    _guard: SseConnectionGuard,
}

impl<S> GuardedSseStream<S> {
    pub fn new(stream: S, guard: SseConnectionGuard) -> Self {
        Self {
            stream: Box::pin(stream),
            _guard: guard,
        }
    }
}

impl<S, T, E> Stream for GuardedSseStream<S>
where
    S: Stream<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

/// SSE event for one sandbox event; oversized payloads are replaced by a notice
pub fn sandbox_event(event: &SandboxEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) if data.len() <= MAX_SSE_EVENT_SIZE => Event::default().event("sandbox").data(data),
        Ok(data) => {
            warn!(size = data.len(), "SSE event too large, sending summary");
            Event::default().event("sandbox").data(
                json!({
                    "userId": event.user_id,
                    "timestamp": event.timestamp,
                    "type": "truncated",
                    "size": data.len(),
                })
                .to_string(),
            )
        }
        Err(e) => error_event(&format!("failed to serialize event: {}", e)),
    }
}

pub fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub user_id: Option<String>,
}

/// `GET /api/events?userId=`
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let Some(user_id) = query.user_id.filter(|u| !u.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "userId is required" })),
        )
            .into_response();
    };

    let guard = match state.sse.try_acquire(&user_id) {
        Ok(guard) => guard,
        Err(SseConnectionLimitExceeded) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Too many event streams for this user" })),
            )
                .into_response();
        }
    };

    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let user_id = user_id.clone();
        async move {
            match item {
                Ok(event) if event.user_id == user_id => {
                    Some(Ok::<Event, Infallible>(sandbox_event(&event)))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "SSE subscriber lagged");
                    Some(Ok(error_event(&format!("{} events were dropped", skipped))))
                }
            }
        }
    });

    Sse::new(GuardedSseStream::new(stream, guard))
        .keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE_INTERVAL)
                .text("keep-alive"),
        )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_caps_per_user() {
        let tracker = SseConnectionTracker::new(2);
        let a = tracker.try_acquire("alice").unwrap();
        let _b = tracker.try_acquire("alice").unwrap();
        assert!(tracker.try_acquire("alice").is_err());
        let _other = tracker.try_acquire("bob").unwrap();

        drop(a);
        assert_eq!(tracker.active("alice"), 1);
        assert!(tracker.try_acquire("alice").is_ok());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let tracker = SseConnectionTracker::new(1);
        {
            let _guard = tracker.try_acquire("alice").unwrap();
            assert_eq!(tracker.active("alice"), 1);
        }
        assert_eq!(tracker.active("alice"), 0);
    }
}
