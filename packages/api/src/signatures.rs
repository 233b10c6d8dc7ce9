// ABOUTME: Broker that hands unsigned transactions to the user's wallet and waits for the result
// ABOUTME: Requests are announced on the event bus and completed by the submitSignature action

use async_trait::async_trait;
use sorobox_sandbox::{
    EventBus, EventKind, SandboxError, SignatureRequest, SignedTransaction, TransactionSigner,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// The wallet's answer to one signature request
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureResponse {
    Signed(String),
    Rejected(String),
}

struct Pending {
    user_id: String,
    reply: oneshot::Sender<SignatureResponse>,
}

type PendingTable = Arc<Mutex<HashMap<String, Pending>>>;

fn lock(table: &PendingTable) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
    table.lock().unwrap_or_else(|poisoned| {
        warn!("Signature table mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

#[derive(Clone)]
pub struct SignatureBroker {
    pending: PendingTable,
    events: EventBus,
    timeout: Duration,
}

impl SignatureBroker {
    pub fn new(events: EventBus, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
            timeout,
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Ids of requests currently waiting on `user_id`
    pub fn pending_for(&self, user_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.pending)
            .iter()
            .filter(|(_, p)| p.user_id == user_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Complete a pending request. Only the user it was issued to may answer it.
    pub fn submit(
        &self,
        user_id: &str,
        request_id: &str,
        response: SignatureResponse,
    ) -> Result<(), SandboxError> {
        let pending = {
            let mut table = lock(&self.pending);
            match table.get(request_id) {
                Some(p) if p.user_id == user_id => table.remove(request_id),
                _ => None,
            }
        };
        let Some(pending) = pending else {
            return Err(SandboxError::SignatureRejected(format!(
                "no pending signature request {}",
                request_id
            )));
        };

        info!(user_id, request_id, signed = matches!(response, SignatureResponse::Signed(_)), "Signature response received");
        pending.reply.send(response).map_err(|_| {
            SandboxError::SignatureRejected(format!("request {} is no longer waiting", request_id))
        })
    }
}

/// Removes the table entry if the waiting deploy is cancelled or times out
struct PendingGuard {
    table: PendingTable,
    request_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if lock(&self.table).remove(&self.request_id).is_some() {
            debug!(request_id = %self.request_id, "Signature request abandoned");
        }
    }
}

#[async_trait]
impl TransactionSigner for SignatureBroker {
    async fn sign(&self, request: SignatureRequest) -> Result<SignedTransaction, SandboxError> {
        let (reply, answer) = oneshot::channel();
        lock(&self.pending).insert(
            request.request_id.clone(),
            Pending {
                user_id: request.user_id.clone(),
                reply,
            },
        );
        let _guard = PendingGuard {
            table: self.pending.clone(),
            request_id: request.request_id.clone(),
        };

        self.events.publish(
            &request.user_id,
            EventKind::SignatureRequested {
                request_id: request.request_id.clone(),
                phase: request.phase.to_string(),
                transaction_xdr: request.transaction_xdr.clone(),
                network_passphrase: request.network_passphrase.clone(),
            },
        );

        match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(SignatureResponse::Signed(xdr))) => Ok(SignedTransaction { xdr }),
            Ok(Ok(SignatureResponse::Rejected(reason))) => {
                Err(SandboxError::SignatureRejected(reason))
            }
            Ok(Err(_)) => Err(SandboxError::SignatureRejected(
                "signature request was dropped".to_string(),
            )),
            Err(_) => {
                warn!(request_id = %request.request_id, "Timed out waiting for wallet signature");
                Err(SandboxError::SignatureRejected(format!(
                    "no signature within {} seconds",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sorobox_sandbox::DeployPhase;

    fn request(id: &str) -> SignatureRequest {
        SignatureRequest {
            request_id: id.to_string(),
            user_id: "alice".to_string(),
            phase: DeployPhase::Upload,
            transaction_xdr: "AAAAunsigned".to_string(),
            network_passphrase: "Test SDF Network ; September 2015".to_string(),
        }
    }

    async fn wait_pending(broker: &SignatureBroker, count: usize) {
        while broker.pending_count() != count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_signed_response_completes_request() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let broker = SignatureBroker::new(events, Duration::from_secs(60));

        let signer = broker.clone();
        let waiting = tokio::spawn(async move { signer.sign(request("req-1")).await });

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            EventKind::SignatureRequested { ref request_id, ref phase, .. }
                if request_id == "req-1" && phase == "upload"
        ));
        assert_eq!(broker.pending_for("alice"), vec!["req-1".to_string()]);

        broker
            .submit("alice", "req-1", SignatureResponse::Signed("AAAAsigned".into()))
            .unwrap();
        let signed = waiting.await.unwrap().unwrap();
        assert_eq!(signed.xdr, "AAAAsigned");
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_and_wrong_user() {
        let broker = SignatureBroker::new(EventBus::default(), Duration::from_secs(60));
        let signer = broker.clone();
        let waiting = tokio::spawn(async move { signer.sign(request("req-2")).await });
        wait_pending(&broker, 1).await;

        assert!(broker
            .submit("mallory", "req-2", SignatureResponse::Signed("x".into()))
            .is_err());
        broker
            .submit("alice", "req-2", SignatureResponse::Rejected("User declined".into()))
            .unwrap();

        let err = waiting.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_REJECTED");
        assert!(err.to_string().contains("User declined"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_pending_request() {
        let broker = SignatureBroker::new(EventBus::default(), Duration::from_secs(300));
        let err = broker.sign(request("req-3")).await.unwrap_err();
        assert!(matches!(err, SandboxError::SignatureRejected(_)));
        assert_eq!(broker.pending_count(), 0);
        assert!(broker
            .submit("alice", "req-3", SignatureResponse::Signed("late".into()))
            .is_err());
    }
}
