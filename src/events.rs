//! State-change notifications for presentation clients.
//!
//! Events go out on a `tokio::sync::broadcast` channel. Sending never blocks
//! and never fails the caller: with no subscribers the event is dropped, and
//! a subscriber that falls behind sees `RecvError::Lagged` and should re-read
//! state through the query operations.

use serde::Serialize;
use study_companion_core::models::{ChatMessage, Document, DocumentId};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A document was added or changed status.
    DocumentUpdated { document: Document },
    DocumentRemoved { id: DocumentId },
    /// A message was appended to a session; assistant messages start pending.
    MessageAppended { session_id: Uuid, message: ChatMessage },
    /// A pending assistant message received its final text.
    MessageFinalized { session_id: Uuid, message: ChatMessage },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
