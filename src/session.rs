//! Study sessions and the per-session turn state machine.
//!
//! A session holds an append-only list of chat messages and a turn state:
//! `Idle -> AwaitingAnswer -> Idle`. [`Session::begin_turn`] appends the
//! user's question plus a pending assistant message and hands back a
//! [`TurnGuard`]. Finishing the guard fills in the answer; dropping it
//! unfinished (a failed or cancelled turn) fills in an apology instead.
//! Either way the session returns to `Idle`, so a lost turn can never wedge
//! a session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use study_companion_core::models::{ChatMessage, SourceRef};
use uuid::Uuid;

use crate::error::{Result, StudyError};
use crate::events::{Event, EventBus};

/// First message of every session.
pub const GREETING: &str = "Hi! I'm your StudyMate AI assistant. Upload your documents and ask me \
anything about them. I can help you understand complex concepts, summarize content, and answer \
specific questions about your study materials.";

/// Text of an assistant message whose turn ended without an answer.
pub const INTERRUPTED_ANSWER: &str =
    "Sorry, something went wrong while answering that question. Please try asking again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingAnswer,
}

struct SessionInner {
    messages: Vec<ChatMessage>,
    state: TurnState,
}

pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

/// Snapshot of a session for clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: TurnState,
    pub messages: Vec<ChatMessage>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                messages: vec![ChatMessage::assistant(GREETING, Vec::new())],
                state: TurnState::Idle,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TurnState {
        self.inner.lock().state
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn view(&self) -> SessionView {
        let inner = self.inner.lock();
        SessionView {
            id: self.id,
            created_at: self.created_at,
            state: inner.state,
            messages: inner.messages.clone(),
        }
    }

    /// Start a turn for `question`.
    ///
    /// Fails with `EmptyQuestion` for blank input and `TurnInProgress` while
    /// another answer is pending; neither touches the message list.
    pub fn begin_turn(self: &Arc<Self>, question: &str, events: &EventBus) -> Result<TurnGuard> {
        let question = question.trim();
        if question.is_empty() {
            return Err(StudyError::EmptyQuestion);
        }

        let user = ChatMessage::user(question);
        let pending = ChatMessage::pending_assistant();
        {
            let mut inner = self.inner.lock();
            if inner.state == TurnState::AwaitingAnswer {
                return Err(StudyError::TurnInProgress);
            }
            inner.state = TurnState::AwaitingAnswer;
            inner.messages.push(user.clone());
            inner.messages.push(pending.clone());
        }

        let message_id = pending.id;
        for message in [user, pending] {
            events.emit(Event::MessageAppended {
                session_id: self.id,
                message,
            });
        }

        Ok(TurnGuard {
            session: Arc::clone(self),
            events: events.clone(),
            message_id,
            finished: false,
        })
    }

    fn finalize(&self, message_id: Uuid, text: String, sources: Vec<SourceRef>) -> Option<ChatMessage> {
        let mut inner = self.inner.lock();
        inner.state = TurnState::Idle;
        let message = inner.messages.iter_mut().rev().find(|m| m.id == message_id)?;
        message.text = text;
        message.sources = sources;
        message.pending = false;
        message.timestamp = Utc::now();
        Some(message.clone())
    }
}

/// An in-flight turn. See the module docs.
pub struct TurnGuard {
    session: Arc<Session>,
    events: EventBus,
    message_id: Uuid,
    finished: bool,
}

impl TurnGuard {
    /// ID of the pending assistant message.
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Fill in the assistant message and return the session to `Idle`.
    pub fn finish(mut self, text: impl Into<String>, sources: Vec<SourceRef>) -> ChatMessage {
        self.finished = true;
        self.complete(text.into(), sources)
    }

    fn complete(&self, text: String, sources: Vec<SourceRef>) -> ChatMessage {
        let fallback = ChatMessage::assistant(text.clone(), sources.clone());
        match self.session.finalize(self.message_id, text, sources) {
            Some(message) => {
                self.events.emit(Event::MessageFinalized {
                    session_id: self.session.id,
                    message: message.clone(),
                });
                message
            }
            None => fallback,
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.complete(INTERRUPTED_ANSWER.to_string(), Vec::new());
        }
    }
}

/// All live sessions.
pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions.insert(session.id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| StudyError::NotFound(format!("session {}", id)))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_companion_core::models::{ChatRole, Locator};

    fn new_session() -> (SessionManager, Arc<Session>, EventBus) {
        let manager = SessionManager::new();
        let session = manager.create();
        (manager, session, EventBus::new())
    }

    #[test]
    fn new_session_starts_with_greeting() {
        let (_, session, _) = new_session();
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::Assistant);
        assert_eq!(messages[0].text, GREETING);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn turn_appends_question_and_pending_answer() {
        let (_, session, events) = new_session();
        let guard = session.begin_turn("  What is osmosis? ", &events).unwrap();
        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text, "What is osmosis?");
        assert!(messages[2].pending);
        assert_eq!(messages[2].id, guard.message_id());
        assert_eq!(session.state(), TurnState::AwaitingAnswer);

        let source = SourceRef {
            document_name: "bio.txt".to_string(),
            locator: Locator::Offset { start: 0, end: 10 },
        };
        let answer = guard.finish("Water diffusion.", vec![source.clone()]);
        assert!(!answer.pending);
        assert_eq!(answer.sources, vec![source]);
        assert_eq!(session.messages()[2], answer);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn second_question_while_awaiting_is_rejected() {
        let (_, session, events) = new_session();
        let _guard = session.begin_turn("first", &events).unwrap();
        let before = session.messages();

        let err = session.begin_turn("second", &events).err().unwrap();
        assert_eq!(err, StudyError::TurnInProgress);
        assert_eq!(session.messages(), before);
    }

    #[test]
    fn dropped_turn_is_finalized_and_released() {
        let (_, session, events) = new_session();
        let guard = session.begin_turn("question", &events).unwrap();
        drop(guard);

        let last = session.messages().pop().unwrap();
        assert_eq!(last.text, INTERRUPTED_ANSWER);
        assert!(!last.pending);
        assert!(last.sources.is_empty());
        assert!(session.begin_turn("again", &events).is_ok());
    }

    #[test]
    fn blank_question_is_rejected() {
        let (_, session, events) = new_session();
        let err = session.begin_turn("   ", &events).err().unwrap();
        assert_eq!(err, StudyError::EmptyQuestion);
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn events_follow_the_turn() {
        let (_, session, events) = new_session();
        let mut rx = events.subscribe();
        session.begin_turn("why?", &events).unwrap().finish("because", Vec::new());

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| match e {
                Event::MessageAppended { .. } => "appended",
                Event::MessageFinalized { .. } => "finalized",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["appended", "appended", "finalized"]);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let manager = SessionManager::new();
        assert!(matches!(manager.get(Uuid::new_v4()), Err(StudyError::NotFound(_))));
        assert!(manager.is_empty());
    }
}
