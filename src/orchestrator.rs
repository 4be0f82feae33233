//! Session orchestrator: the in-process API of the study companion.
//!
//! Ties the pieces together. Uploads go through the [`DocumentStore`] and
//! are handed to the background [`Ingestor`]; questions go through a
//! session's turn state machine, the retriever, and the answer composer.
//! Both the HTTP server and the CLI drive everything through this type.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use study_companion::config::Config;
//! use study_companion::orchestrator::Orchestrator;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let studymate = Orchestrator::new(Config::default());
//! let text = b"Photosynthesis converts light energy into chemical energy.".to_vec();
//! let len = text.len() as u64;
//! let doc = studymate.submit_document(text, "notes.txt", len)?;
//! studymate.wait_for_document(doc.id, Duration::from_secs(10)).await?;
//!
//! let session = studymate.create_session();
//! let turn = studymate
//!     .submit_question(session.id, "What does photosynthesis convert?")
//!     .await?;
//! println!("{}", turn.answer_text);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use study_companion_core::answer::{AnswerComposer, ComposedAnswer, ExtractiveComposer, Passage};
use study_companion_core::models::{
    Chunk, ChatMessage, Document, DocumentId, DocumentStatus, SourceRef,
};
use study_companion_core::search::{retrieve, RetrievalRequest};
use study_companion_core::store::memory::InMemoryStore;
use study_companion_core::store::{ChunkStore, ScoredChunk};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::documents::DocumentStore;
use crate::error::{Result, StudyError};
use crate::events::{Event, EventBus};
use crate::ingest::Ingestor;
use crate::session::{SessionManager, SessionView};
use crate::stats::StudyStats;

/// Prefix of the assistant message when a turn fails after it started.
pub const TURN_FAILED_PREFIX: &str = "Sorry, I couldn't search your study materials just now";

/// Outcome of one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurnResult {
    pub answer_text: String,
    pub sources: Vec<SourceRef>,
    /// False for the fallback answer and for failed turns; such answers
    /// never carry sources.
    pub grounded: bool,
    /// The finalized assistant message as stored in the session.
    pub message: ChatMessage,
}

pub struct Orchestrator {
    config: Arc<Config>,
    documents: Arc<DocumentStore>,
    index: Arc<dyn ChunkStore>,
    ingestor: Arc<Ingestor>,
    composer: Arc<dyn AnswerComposer>,
    sessions: SessionManager,
    events: EventBus,
    questions_asked: AtomicU64,
}

impl Orchestrator {
    /// Build an orchestrator with the in-memory index and the extractive
    /// composer.
    pub fn new(config: Config) -> Self {
        Self::with_composer(config, Arc::new(ExtractiveComposer::default()))
    }

    pub fn with_composer(config: Config, composer: Arc<dyn AnswerComposer>) -> Self {
        let events = EventBus::new();
        let documents = Arc::new(DocumentStore::new(config.upload.clone()));
        let index: Arc<dyn ChunkStore> = Arc::new(InMemoryStore::new());
        let ingestor = Arc::new(Ingestor::new(
            &config,
            Arc::clone(&documents),
            Arc::clone(&index),
            events.clone(),
        ));
        Self {
            config: Arc::new(config),
            documents,
            index,
            ingestor,
            composer,
            sessions: SessionManager::new(),
            events,
            questions_asked: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ============ Documents ============

    /// Validate and store an upload, then start ingesting it in the
    /// background. Returns the `pending` document right away.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit_document(&self, bytes: Vec<u8>, name: &str, declared_size: u64) -> Result<Document> {
        let document = self.documents.add(bytes, name, declared_size)?;
        info!(
            document = %document.id,
            name = %document.name,
            size = document.size_bytes,
            "accepted upload"
        );
        self.events.emit(Event::DocumentUpdated {
            document: document.clone(),
        });
        self.ingestor.schedule(document.id);
        Ok(document)
    }

    /// Delete a document and purge its chunks from the index.
    pub async fn remove_document(&self, id: DocumentId) -> Result<Document> {
        self.ingestor.remove(id).await
    }

    pub fn list_documents(&self) -> Vec<Document> {
        self.documents.list()
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.documents.get(id)
    }

    /// Indexed chunks of a document in order.
    pub async fn document_chunks(&self, id: DocumentId) -> Result<Vec<Chunk>> {
        self.documents.get(id)?;
        self.index
            .document_chunks(id)
            .await
            .map_err(|e| StudyError::IndexingFailed(e.to_string()))
    }

    /// Run the pipeline again for an existing document. Its chunks are
    /// replaced atomically once the new run commits.
    pub fn reindex_document(&self, id: DocumentId) -> Result<Document> {
        let document = self.documents.set_status(id, DocumentStatus::Pending)?;
        info!(document = %id, name = %document.name, "reindexing");
        self.events.emit(Event::DocumentUpdated {
            document: document.clone(),
        });
        self.ingestor.schedule(id);
        Ok(document)
    }

    /// Wait until a document is `ready` or `failed`.
    ///
    /// Returns the document as it is when `timeout` runs out, so callers
    /// should check the status. Fails with `NotFound` if the document is
    /// removed while waiting.
    pub async fn wait_for_document(&self, id: DocumentId, timeout: Duration) -> Result<Document> {
        // Subscribe before the first read so no status change slips between.
        let mut rx = self.events.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let document = self.documents.get(id)?;
            if document.status.is_terminal() {
                return Ok(document);
            }
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) | Err(_) => return Ok(document),
            }
        }
    }

    // ============ Sessions ============

    pub fn create_session(&self) -> SessionView {
        let session = self.sessions.create();
        debug!(session = %session.id(), "created session");
        session.view()
    }

    pub fn session(&self, session_id: Uuid) -> Result<SessionView> {
        Ok(self.sessions.get(session_id)?.view())
    }

    /// Messages of a session in submission order.
    pub fn messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        Ok(self.sessions.get(session_id)?.messages())
    }

    /// Answer a question within a session.
    ///
    /// Rejects blank questions and questions asked while the session is
    /// still answering a previous one. Once the turn has started, failures
    /// do not surface as errors: they become the assistant's answer, with
    /// `grounded == false`.
    pub async fn submit_question(&self, session_id: Uuid, text: &str) -> Result<ChatTurnResult> {
        let session = self.sessions.get(session_id)?;
        let turn = session.begin_turn(text, &self.events)?;
        self.questions_asked.fetch_add(1, Ordering::Relaxed);

        let answer = match self.answer(text.trim()).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(session = %session_id, error = %err, "chat turn failed");
                ComposedAnswer {
                    text: format!("{}: {}", TURN_FAILED_PREFIX, err),
                    sources: Vec::new(),
                    grounded: false,
                }
            }
        };

        let message = turn.finish(answer.text.clone(), answer.sources.clone());
        info!(
            session = %session_id,
            grounded = answer.grounded,
            sources = answer.sources.len(),
            "answered question"
        );
        Ok(ChatTurnResult {
            answer_text: answer.text,
            sources: answer.sources,
            grounded: answer.grounded,
            message,
        })
    }

    async fn answer(&self, query: &str) -> anyhow::Result<ComposedAnswer> {
        let visible = self.documents.ready_ids();
        let request = RetrievalRequest {
            query,
            visible: &visible,
            params: self.config.retrieval_params(),
        };
        let hits = retrieve(self.index.as_ref(), &request).await?;
        debug!(hits = hits.len(), ready = visible.len(), "retrieved chunks");

        let passages = citable_passages(&self.documents, hits);
        let mut answer = self.composer.compose(query, &passages).await?;
        answer.grounded = answer.grounded && !answer.sources.is_empty();
        if !answer.grounded {
            answer.sources.clear();
        }
        debug!(composer = self.composer.name(), grounded = answer.grounded, "composed answer");
        Ok(answer)
    }

    // ============ Progress ============

    pub async fn stats(&self) -> StudyStats {
        let indexed_chunks = match self.index.stats().await {
            Ok(stats) => stats.chunks,
            Err(e) => {
                warn!(error = %e, "index stats unavailable");
                0
            }
        };
        StudyStats::collect(
            &self.documents.list(),
            indexed_chunks,
            self.questions_asked.load(Ordering::Relaxed),
            self.sessions.len(),
        )
    }

    /// Receive document and message events as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

/// Attach document names to retrieved chunks, dropping chunks of documents
/// that were removed or left `ready` since the visible set was taken.
fn citable_passages(documents: &DocumentStore, hits: Vec<ScoredChunk>) -> Vec<Passage> {
    hits.into_iter()
        .filter_map(|hit| {
            let document = documents
                .get(hit.chunk.document_id)
                .ok()
                .filter(|d| d.status == DocumentStatus::Ready)?;
            Some(Passage {
                document_name: document.name,
                chunk: hit.chunk,
                score: hit.score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use study_companion_core::models::Locator;

    fn hit(document_id: DocumentId) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("{}-0", document_id),
                document_id,
                chunk_index: 0,
                text: "Tides follow the moon.".to_string(),
                locator: Locator::Offset { start: 0, end: 22 },
                hash: String::new(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn test_only_ready_documents_are_cited() {
        let documents = DocumentStore::new(UploadConfig::default());
        let ready = documents.add(b"Tides follow the moon.".to_vec(), "ready.txt", 22).unwrap();
        documents.mark_ready(ready.id, 1).unwrap();
        let reindexing = documents.add(b"Tides follow the moon.".to_vec(), "again.txt", 22).unwrap();
        documents.mark_ready(reindexing.id, 1).unwrap();
        let removed = documents.add(b"Tides follow the moon.".to_vec(), "gone.txt", 22).unwrap();
        documents.mark_ready(removed.id, 1).unwrap();

        // State changes after the visible set was taken.
        documents.set_status(reindexing.id, DocumentStatus::Pending).unwrap();
        documents.remove(removed.id).unwrap();

        let passages = citable_passages(
            &documents,
            vec![hit(ready.id), hit(reindexing.id), hit(removed.id)],
        );
        let names: Vec<&str> = passages.iter().map(|p| p.document_name.as_str()).collect();
        assert_eq!(names, vec!["ready.txt"]);
    }
}
