//! Session change notifications for dependent collaborators.
//!
//! Presentation layers subscribe to learn when authenticated data must be
//! discarded (`SignedOut`, `Expired`) or may be fetched (`SignedIn`).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::Subject;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    SignedIn { subject: Subject },
    Refreshed { subject: Subject },
    /// The refresh token was rejected and the session cleared.
    Expired,
    SignedOut,
}

impl SessionEvent {
    /// True when listeners must drop anything fetched under the old session.
    pub fn clears_data(&self) -> bool {
        matches!(self, SessionEvent::Expired | SessionEvent::SignedOut)
    }
}

#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}
