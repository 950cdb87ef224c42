/// Call signaling over the `calls` collection
use crate::models::{CallSession, CallStatus};
use crate::store::{
    doc_path, patch, DocumentChange, DocumentStore, Query, StoreError, StoreResult, Subscription, CALLS,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// A remote change relevant to this client
#[derive(Debug, Clone, PartialEq)]
pub enum CallSignal {
    /// A new ringing session addressed to us
    IncomingRing(CallSession),
    /// A session we take part in changed status
    StatusChanged(CallSession),
}

#[derive(Clone)]
pub struct CallSignaling {
    store: Arc<dyn DocumentStore>,
    self_id: String,
}

impl CallSignaling {
    pub fn new(store: Arc<dyn DocumentStore>, self_id: &str) -> Self {
        Self {
            store,
            self_id: self_id.to_string(),
        }
    }

    pub fn publish(&self, session: &CallSession) -> StoreResult<()> {
        let data =
            serde_json::to_value(session).map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
        self.store.set(CALLS, &session.id, data)?;
        debug!("Published call {} to {}", session.id, session.recipient_id);
        Ok(())
    }

    /// Move the session to `status`. Returns the status the session holds
    /// afterwards: a session that already finished keeps its terminal status.
    pub fn update_status(&self, call_id: &str, status: CallStatus) -> StoreResult<CallStatus> {
        let current: CallSession = self
            .store
            .get(CALLS, call_id)?
            .ok_or_else(|| StoreError::NotFound(doc_path(CALLS, call_id)))?
            .decode()?;
        if current.status == status {
            return Ok(status);
        }
        if !current.status.can_advance_to(status) {
            debug!(
                "Call {} is already {:?}, not moving to {:?}",
                call_id, current.status, status
            );
            return Ok(current.status);
        }
        self.store
            .update(CALLS, call_id, patch(json!({ "status": status })))?;
        Ok(status)
    }

    pub fn subscribe(&self) -> StoreResult<CallFeed> {
        let query = Query::collection(CALLS).array_contains("participantIds", self.self_id.as_str());
        let subscription = self.store.subscribe(query)?;
        Ok(CallFeed {
            self_id: self.self_id.clone(),
            subscription,
        })
    }
}

pub struct CallFeed {
    self_id: String,
    subscription: Subscription,
}

impl CallFeed {
    /// Translate pending store changes into call signals
    pub fn poll(&mut self) -> Vec<CallSignal> {
        let mut signals = Vec::new();
        for change in self.subscription.drain() {
            let (doc, added) = match change {
                DocumentChange::Added(doc) => (doc, true),
                DocumentChange::Modified(doc) => (doc, false),
                DocumentChange::Removed(_) => continue,
            };
            let session: CallSession = match doc.decode() {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping malformed call document {}: {}", doc.id, e);
                    continue;
                }
            };
            if added {
                if session.status == CallStatus::Ringing && session.recipient_id == self.self_id {
                    signals.push(CallSignal::IncomingRing(session));
                }
            } else {
                signals.push(CallSignal::StatusChanged(session));
            }
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallType;
    use crate::store::MemoryStore;

    #[test]
    fn test_ring_and_status_signals() {
        let backend = MemoryStore::new();
        let alice = CallSignaling::new(Arc::new(backend.clone()), "alice");
        let bob = CallSignaling::new(Arc::new(backend), "bob");
        let mut bob_feed = bob.subscribe().unwrap();
        let mut alice_feed = alice.subscribe().unwrap();

        let session = CallSession::new("alice", "bob", CallType::Video);
        alice.publish(&session).unwrap();

        assert_eq!(bob_feed.poll(), vec![CallSignal::IncomingRing(session.clone())]);
        // The caller does not ring for its own call
        assert!(alice_feed.poll().is_empty());

        bob.update_status(&session.id, CallStatus::Accepted).unwrap();
        let signals = alice_feed.poll();
        assert_eq!(signals.len(), 1);
        match &signals[0] {
            CallSignal::StatusChanged(s) => assert_eq!(s.status, CallStatus::Accepted),
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_finished_session_keeps_its_status() {
        let backend = MemoryStore::new();
        let alice = CallSignaling::new(Arc::new(backend.clone()), "alice");
        let bob = CallSignaling::new(Arc::new(backend), "bob");

        let session = CallSession::new("alice", "bob", CallType::Voice);
        alice.publish(&session).unwrap();
        assert_eq!(alice.update_status(&session.id, CallStatus::Ended).unwrap(), CallStatus::Ended);
        assert_eq!(
            bob.update_status(&session.id, CallStatus::Accepted).unwrap(),
            CallStatus::Ended
        );
        assert!(bob.update_status("missing", CallStatus::Ended).is_err());
    }
}
