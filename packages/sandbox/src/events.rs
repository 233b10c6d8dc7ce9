// ABOUTME: Structured event bus carrying sandbox progress to subscribers such as the UI terminal
// ABOUTME: Every published event is also mirrored to tracing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Pipeline stage for a single build or deploy request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStage {
    Idle,
    Building,
    Built,
    BuildFailed,
    Deploying,
    Deployed,
    DeployFailed,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStage::BuildFailed | PipelineStage::Deployed | PipelineStage::DeployFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    Log {
        level: LogLevel,
        message: String,
    },
    StageChanged {
        project: String,
        stage: PipelineStage,
    },
    /// An unsigned transaction awaits the user's wallet
    SignatureRequested {
        request_id: String,
        phase: String,
        transaction_xdr: String,
        network_passphrase: String,
    },
    PollProgress {
        phase: String,
        attempt: u32,
        max_attempts: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxEvent {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Broadcast channel of sandbox events. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SandboxEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, user_id: &str, kind: EventKind) {
        match &kind {
            EventKind::Log { level, message } => match level {
                LogLevel::Info => info!(user_id, "{}", message),
                LogLevel::Warn => warn!(user_id, "{}", message),
                LogLevel::Error => tracing::error!(user_id, "{}", message),
            },
            EventKind::StageChanged { project, stage } => {
                info!(user_id, project, ?stage, "Pipeline stage changed")
            }
            EventKind::SignatureRequested {
                request_id, phase, ..
            } => info!(user_id, request_id, phase, "Awaiting wallet signature"),
            EventKind::PollProgress {
                phase,
                attempt,
                max_attempts,
            } => info!(
                user_id,
                phase, attempt, max_attempts, "Waiting for transaction confirmation"
            ),
        }

        let event = SandboxEvent {
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn info(&self, user_id: &str, message: impl Into<String>) {
        self.publish(
            user_id,
            EventKind::Log {
                level: LogLevel::Info,
                message: message.into(),
            },
        );
    }

    pub fn warn(&self, user_id: &str, message: impl Into<String>) {
        self.publish(
            user_id,
            EventKind::Log {
                level: LogLevel::Warn,
                message: message.into(),
            },
        );
    }

    pub fn error(&self, user_id: &str, message: impl Into<String>) {
        self.publish(
            user_id,
            EventKind::Log {
                level: LogLevel::Error,
                message: message.into(),
            },
        );
    }

    pub fn stage(&self, user_id: &str, project: &str, stage: PipelineStage) {
        self.publish(
            user_id,
            EventKind::StageChanged {
                project: project.to_string(),
                stage,
            },
        );
    }
}
