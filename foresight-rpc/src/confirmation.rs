//! Pending confirmations awaiting a user decision.
//!
//! Intercepted requests are admitted one at a time through an async gate.
//! The first admitted request opens the dialog; requests arriving while it
//! is open join the same pending list.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::simulation::{SignedMessage, SimulationState, TransactionSubmission};

#[derive(Debug, Clone, derive_more::From)]
pub enum PendingPayload {
    Transaction(TransactionSubmission),
    Message(SignedMessage),
}

#[derive(Debug, Clone)]
pub enum PendingState {
    Crafting,
    Simulating,
    Simulated { state: Arc<SimulationState> },
    FailedToSimulate { message: String },
}

impl PendingState {
    pub fn label(&self) -> &'static str {
        match self {
            PendingState::Crafting => "crafting",
            PendingState::Simulating => "simulating",
            PendingState::Simulated { .. } => "simulated",
            PendingState::FailedToSimulate { .. } => "failedToSimulate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalStatus {
    WaitingForUser,
    WaitingForSigner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    Approved,
    Rejected,
    NoResponse,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("no pending confirmation with id {0}")]
    Unknown(u64),

    #[error("confirmation {0} was already decided")]
    AlreadyResolved(u64),
}

/// One user-facing confirmation.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub unique_request_identifier: u64,
    pub method: String,
    pub website: String,
    pub created: DateTime<Utc>,
    pub payload: PendingPayload,
    pub state: PendingState,
    pub approval_status: ApprovalStatus,
}

struct Entry {
    confirmation: PendingConfirmation,
    responder: Option<oneshot::Sender<Resolution>>,
}

/// Handed to the request that created the confirmation.
pub struct Ticket {
    pub id: u64,
    /// This request opened the dialog rather than joining an open one.
    pub opened_dialog: bool,
    decision: oneshot::Receiver<Resolution>,
}

#[derive(Default)]
pub struct ConfirmationQueue {
    gate: tokio::sync::Mutex<()>,
    entries: Mutex<BTreeMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl ConfirmationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new confirmation in the `Crafting` state.
    pub async fn admit(&self, method: &str, website: &str, payload: PendingPayload) -> Ticket {
        let _admission = self.gate.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (responder, decision) = oneshot::channel();
        let confirmation = PendingConfirmation {
            unique_request_identifier: id,
            method: method.to_string(),
            website: website.to_string(),
            created: Utc::now(),
            payload,
            state: PendingState::Crafting,
            approval_status: ApprovalStatus::WaitingForUser,
        };

        let opened_dialog = match self.entries.lock() {
            Ok(mut entries) => {
                let opened = entries.is_empty();
                entries.insert(
                    id,
                    Entry {
                        confirmation,
                        responder: Some(responder),
                    },
                );
                opened
            }
            Err(_) => {
                warn!(id, "Confirmation lock poisoned; request will time out as unanswered");
                false
            }
        };
        if opened_dialog {
            info!(id, method, website, "Opening confirmation dialog");
        } else {
            info!(id, method, website, "Appending to open confirmation dialog");
        }
        Ticket {
            id,
            opened_dialog,
            decision,
        }
    }

    fn with_entry<R>(&self, id: u64, f: impl FnOnce(&mut Entry) -> R) -> Result<R, ConfirmationError> {
        let mut entries = self.entries.lock().map_err(|_| ConfirmationError::Unknown(id))?;
        entries.get_mut(&id).map(f).ok_or(ConfirmationError::Unknown(id))
    }

    pub fn set_state(&self, id: u64, state: PendingState) -> Result<(), ConfirmationError> {
        debug!(id, state = state.label(), "Confirmation state changed");
        self.with_entry(id, |entry| entry.confirmation.state = state)
    }

    /// Deliver the user's decision. Approved items stay listed as
    /// `WaitingForSigner` until [`Self::complete`].
    pub fn resolve(&self, id: u64, resolution: Resolution) -> Result<(), ConfirmationError> {
        let responder = self.with_entry(id, |entry| {
            if resolution == Resolution::Approved {
                entry.confirmation.approval_status = ApprovalStatus::WaitingForSigner;
            }
            entry.responder.take()
        })?;
        let Some(responder) = responder else {
            return Err(ConfirmationError::AlreadyResolved(id));
        };
        if resolution != Resolution::Approved {
            self.complete(id);
        }
        info!(id, ?resolution, "Confirmation resolved");
        // The waiting request may already have timed out.
        let _ = responder.send(resolution);
        Ok(())
    }

    /// Wait for the decision. No decision within `timeout`, or a dropped
    /// responder, counts as no response.
    pub async fn wait(&self, ticket: Ticket, timeout: Option<Duration>) -> Resolution {
        let id = ticket.id;
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, ticket.decision).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    info!(id, "Confirmation timed out");
                    None
                }
            },
            None => ticket.decision.await.ok(),
        };
        match outcome {
            Some(resolution) => resolution,
            None => {
                self.complete(id);
                Resolution::NoResponse
            }
        }
    }

    /// Drop a confirmation from the list.
    pub fn complete(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }

    /// The owning window closed: answer everything with no response.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Entry> = match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries).into_values().collect(),
            Err(_) => Vec::new(),
        };
        let count = drained.len();
        for entry in drained {
            if let Some(responder) = entry.responder {
                let _ = responder.send(Resolution::NoResponse);
            }
        }
        if count > 0 {
            info!(count, "Closed confirmation dialog");
        }
        count
    }

    pub fn list(&self) -> Vec<PendingConfirmation> {
        self.entries
            .lock()
            .map(|entries| entries.values().map(|e| e.confirmation.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: u64) -> Option<PendingConfirmation> {
        self.with_entry(id, |entry| entry.confirmation.clone()).ok()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use alloy_primitives::{Address, Bytes, B256};

    use super::*;
    use crate::simulation::SignableMessage;

    fn message() -> PendingPayload {
        SignedMessage {
            identifier: B256::repeat_byte(1),
            method: "personal_sign".into(),
            from: Address::repeat_byte(1),
            message: SignableMessage::PersonalSign {
                message: Bytes::from_static(b"hi"),
            },
            website: "https://app.example".into(),
            created: Utc::now(),
            quarantine_codes: BTreeSet::new(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_first_opens_dialog_rest_append() {
        let queue = ConfirmationQueue::new();
        let first = queue.admit("personal_sign", "a", message()).await;
        let second = queue.admit("personal_sign", "b", message()).await;
        assert!(first.opened_dialog);
        assert!(!second.opened_dialog);
        assert_ne!(first.id, second.id);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_open_one_dialog() {
        let queue = Arc::new(ConfirmationQueue::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.admit("personal_sign", "x", message()).await.opened_dialog
            }));
        }
        let mut opened = 0;
        for handle in handles {
            opened += handle.await.unwrap() as usize;
        }
        assert_eq!(opened, 1);
        assert_eq!(queue.len(), 8);
    }

    #[tokio::test]
    async fn test_approve_then_complete() {
        let queue = ConfirmationQueue::new();
        let ticket = queue.admit("personal_sign", "a", message()).await;
        let id = ticket.id;
        queue.set_state(id, PendingState::Simulating).unwrap();
        queue.resolve(id, Resolution::Approved).unwrap();

        assert_eq!(queue.wait(ticket, None).await, Resolution::Approved);
        assert_eq!(queue.get(id).unwrap().approval_status, ApprovalStatus::WaitingForSigner);
        assert_eq!(queue.resolve(id, Resolution::Rejected), Err(ConfirmationError::AlreadyResolved(id)));

        queue.complete(id);
        assert!(queue.is_empty());
        assert_eq!(queue.resolve(id, Resolution::Approved), Err(ConfirmationError::Unknown(id)));
    }

    #[tokio::test]
    async fn test_reject_removes_entry() {
        let queue = ConfirmationQueue::new();
        let ticket = queue.admit("personal_sign", "a", message()).await;
        queue.resolve(ticket.id, Resolution::Rejected).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.wait(ticket, None).await, Resolution::Rejected);
    }

    #[tokio::test]
    async fn test_timeout_is_no_response() {
        let queue = ConfirmationQueue::new();
        let ticket = queue.admit("personal_sign", "a", message()).await;
        let resolution = queue.wait(ticket, Some(Duration::from_millis(10))).await;
        assert_eq!(resolution, Resolution::NoResponse);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_all() {
        let queue = ConfirmationQueue::new();
        let a = queue.admit("personal_sign", "a", message()).await;
        let b = queue.admit("personal_sign", "b", message()).await;
        assert_eq!(queue.close_all(), 2);
        assert_eq!(queue.wait(a, None).await, Resolution::NoResponse);
        assert_eq!(queue.wait(b, None).await, Resolution::NoResponse);
        assert!(queue.admit("personal_sign", "c", message()).await.opened_dialog);
    }
}
