// ABOUTME: Registry of live language server sessions and their one-shot disposal
// ABOUTME: Shutdown is broadcast to every session and the registry can wait for them to drain

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};
use uuid::Uuid;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisposeReason {
    ClientClosed,
    ClientError,
    ServerExited,
    KeepaliveExpired,
    Shutdown,
    /// Session task ended without an explicit reason
    Dropped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub container: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    sessions: Mutex<HashMap<Uuid, SessionInfo>>,
    emptied: Notify,
}

impl Inner {
    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionInfo>> {
        self.sessions.lock().unwrap_or_else(|poisoned| {
            warn!("Session registry mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner::default()),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn open(&self, user_id: Option<&str>, container: &str) -> SessionGuard {
        let info = SessionInfo {
            id: Uuid::new_v4(),
            user_id: user_id.map(str::to_string),
            container: container.to_string(),
            opened_at: Utc::now(),
        };
        let id = info.id;
        info!(session = %id, container, ?user_id, "Language server session opened");
        self.inner.sessions().insert(id, info);
        SessionGuard {
            id,
            inner: self.inner.clone(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.inner.sessions().values().cloned().collect();
        sessions.sort_by_key(|s| s.opened_at);
        sessions
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask every live session to close
    pub fn close_all(&self) {
        info!(sessions = self.len(), "Closing all language server sessions");
        self.shutdown.send_replace(true);
    }

    /// Wait until no sessions remain. Returns false on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let emptied = self.inner.emptied.notified();
                if self.is_empty() {
                    return;
                }
                emptied.await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => true,
            Err(_) => {
                warn!(remaining = self.len(), "Timed out draining language server sessions");
                false
            }
        }
    }
}

/// Registration of one live session. Disposal happens at most once.
pub struct SessionGuard {
    id: Uuid,
    inner: Arc<Inner>,
    disposed: AtomicBool,
}

impl SessionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the session. Returns true only for the first call.
    pub fn dispose(&self, reason: DisposeReason) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let remaining = {
            let mut sessions = self.inner.sessions();
            sessions.remove(&self.id);
            sessions.len()
        };
        info!(session = %self.id, ?reason, remaining, "Language server session disposed");
        if remaining == 0 {
            self.inner.emptied.notify_waiters();
        }
        true
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.dispose(DisposeReason::Dropped);
    }
}
