//! Background ingestion pipeline: extract → chunk → index.
//!
//! Every scheduled document runs on its own tokio task, with at most
//! `max_concurrent_ingests` running at once. A run moves the document from
//! `pending` through `processing` to `ready` or `failed`; errors are recorded
//! on the document and never propagate out of the task.
//!
//! # Index consistency
//!
//! Index writes for one document are serialized by a per-document async
//! mutex. The commit step re-checks that the document still exists while
//! holding it, and removal purges under the same mutex after aborting the
//! running task, so a removal racing a finishing run always ends with the
//! document gone and none of its chunks indexed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use study_companion_core::chunk::{chunk_segments, ChunkParams};
use study_companion_core::models::{Document, DocumentId, DocumentStatus};
use study_companion_core::store::ChunkStore;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::documents::DocumentStore;
use crate::error::{ExtractionFailure, Result, StudyError};
use crate::events::{Event, EventBus};
use crate::extract;

pub struct Ingestor {
    documents: Arc<DocumentStore>,
    index: Arc<dyn ChunkStore>,
    events: EventBus,
    chunk_params: ChunkParams,
    extraction_timeout: Duration,
    permits: Semaphore,
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
    /// Running task per document, tagged with the run that owns the slot.
    tasks: DashMap<DocumentId, (u64, AbortHandle)>,
    runs: AtomicU64,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        documents: Arc<DocumentStore>,
        index: Arc<dyn ChunkStore>,
        events: EventBus,
    ) -> Self {
        Self {
            documents,
            index,
            events,
            chunk_params: config.chunk_params(),
            extraction_timeout: config.extraction_timeout(),
            permits: Semaphore::new(config.ingest.max_concurrent_ingests.max(1)),
            locks: DashMap::new(),
            tasks: DashMap::new(),
            runs: AtomicU64::new(0),
        }
    }

    /// Start a background run for `id`, aborting any run already in flight
    /// for the same document.
    pub fn schedule(self: &Arc<Self>, id: DocumentId) {
        let run = self.runs.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);

        // The slot stays locked until the handle is stored, so the task's
        // own cleanup cannot run first and leave a stale entry behind.
        let slot = self.tasks.entry(id);
        let task = tokio::spawn(async move { this.run(id, run).await });
        let abort = task.abort_handle();
        match slot {
            Entry::Occupied(mut entry) => {
                let (_, previous) = entry.insert((run, abort));
                previous.abort();
                debug!(document = %id, "restarted ingestion");
            }
            Entry::Vacant(entry) => {
                entry.insert((run, abort));
            }
        }
    }

    /// Number of documents with a run in flight.
    pub fn active_runs(&self) -> usize {
        self.tasks.len()
    }

    /// Remove a document: stop its ingestion and purge its chunks.
    pub async fn remove(&self, id: DocumentId) -> Result<Document> {
        let document = self.documents.remove(id)?;
        if let Some((_, (_, task))) = self.tasks.remove(&id) {
            task.abort();
        }

        let lock = self.lock_for(id);
        {
            let _guard = lock.lock().await;
            let purged = self
                .index
                .purge_document(id)
                .await
                .map_err(|e| StudyError::IndexingFailed(e.to_string()))?;
            debug!(document = %id, purged, "purged chunks");
        }
        self.locks.remove(&id);

        info!(document = %id, name = %document.name, "removed document");
        self.events.emit(Event::DocumentRemoved { id });
        Ok(document)
    }

    async fn run(self: Arc<Self>, id: DocumentId, run: u64) {
        match self.process(id).await {
            Ok(Some(document)) => {
                info!(
                    document = %id,
                    name = %document.name,
                    chunks = document.chunk_count,
                    "document ready"
                );
            }
            Ok(None) => debug!(document = %id, "document removed during ingestion"),
            Err(err) => self.fail(id, err).await,
        }
        self.tasks.remove_if(&id, |_, (owner, _)| *owner == run);
    }

    async fn process(&self, id: DocumentId) -> Result<Option<Document>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StudyError::IndexingFailed("ingestion is shut down".to_string()))?;

        let (bytes, kind) = match self.documents.content(id) {
            Ok(content) => content,
            Err(StudyError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        match self.documents.set_status(id, DocumentStatus::Processing) {
            Ok(document) => self.events.emit(Event::DocumentUpdated { document }),
            Err(StudyError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        }

        let segments = extract::extract_with_deadline(bytes, kind, self.extraction_timeout).await?;
        let chunks = chunk_segments(id, &segments, &self.chunk_params);
        if chunks.is_empty() {
            return Err(StudyError::extraction(
                ExtractionFailure::Corrupt,
                "no extractable text",
            ));
        }
        debug!(document = %id, segments = segments.len(), chunks = chunks.len(), "chunked");

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        if !self.documents.contains(id) {
            return Ok(None);
        }
        let count = self
            .index
            .replace_document(id, chunks)
            .await
            .map_err(|e| StudyError::IndexingFailed(e.to_string()))?;
        match self.documents.mark_ready(id, count) {
            Ok(document) => {
                self.events.emit(Event::DocumentUpdated {
                    document: document.clone(),
                });
                Ok(Some(document))
            }
            // Removed after the check; the remover purges once we release the lock.
            Err(StudyError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Record a failed run and drop whatever an earlier run indexed.
    async fn fail(&self, id: DocumentId, err: StudyError) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        if let Err(e) = self.index.purge_document(id).await {
            warn!(document = %id, error = %e, "failed to purge chunks of failed document");
        }
        match self.documents.set_failed(id, err.to_string()) {
            Ok(document) => {
                warn!(document = %id, name = %document.name, error = %err, "ingestion failed");
                self.events.emit(Event::DocumentUpdated { document });
            }
            Err(_) => debug!(document = %id, "failed document was already removed"),
        }
    }

    fn lock_for(&self, id: DocumentId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_companion_core::store::memory::InMemoryStore;

    struct Harness {
        documents: Arc<DocumentStore>,
        index: Arc<InMemoryStore>,
        ingestor: Arc<Ingestor>,
    }

    fn harness() -> Harness {
        let config = Config::default();
        let documents = Arc::new(DocumentStore::new(config.upload.clone()));
        let index = Arc::new(InMemoryStore::new());
        let ingestor = Arc::new(Ingestor::new(
            &config,
            Arc::clone(&documents),
            index.clone() as Arc<dyn ChunkStore>,
            EventBus::new(),
        ));
        Harness {
            documents,
            index,
            ingestor,
        }
    }

    async fn settle(h: &Harness, id: DocumentId) -> Document {
        for _ in 0..500 {
            let doc = h.documents.get(id).unwrap();
            if doc.status.is_terminal() && h.ingestor.active_runs() == 0 {
                return doc;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("document {} never settled", id);
    }

    #[tokio::test]
    async fn text_document_becomes_ready() {
        let h = harness();
        let doc = h
            .documents
            .add(b"Enzymes lower activation energy.".to_vec(), "bio.txt", 32)
            .unwrap();
        h.ingestor.schedule(doc.id);

        let done = settle(&h, doc.id).await;
        assert_eq!(done.status, DocumentStatus::Ready);
        assert_eq!(done.chunk_count, 1);
        assert_eq!(h.index.document_chunks(doc.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_document_fails_with_detail() {
        let h = harness();
        let doc = h.documents.add(b"garbage".to_vec(), "broken.pdf", 7).unwrap();
        h.ingestor.schedule(doc.id);

        let done = settle(&h, doc.id).await;
        assert_eq!(done.status, DocumentStatus::Failed);
        assert!(done.error.unwrap().contains("corrupt"));
        assert!(h.index.document_chunks(doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rescheduling_is_idempotent() {
        let h = harness();
        let text = "Newton's laws describe motion. ".repeat(80);
        let doc = h
            .documents
            .add(text.clone().into_bytes(), "physics.txt", text.len() as u64)
            .unwrap();
        h.ingestor.schedule(doc.id);
        let first = settle(&h, doc.id).await;
        let chunks_before = h.index.document_chunks(doc.id).await.unwrap();

        h.ingestor.schedule(doc.id);
        h.ingestor.schedule(doc.id);
        let second = settle(&h, doc.id).await;
        let chunks_after = h.index.document_chunks(doc.id).await.unwrap();

        assert_eq!(first.chunk_count, second.chunk_count);
        assert_eq!(chunks_before, chunks_after);
    }

    #[tokio::test]
    async fn remove_during_ingestion_leaves_no_chunks() {
        let h = harness();
        let text = "Plate tectonics shapes continents. ".repeat(200);
        let doc = h
            .documents
            .add(text.clone().into_bytes(), "geo.txt", text.len() as u64)
            .unwrap();
        h.ingestor.schedule(doc.id);
        h.ingestor.remove(doc.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.index.document_chunks(doc.id).await.unwrap().is_empty());
        assert!(!h.documents.contains(doc.id));
        assert_eq!(h.ingestor.active_runs(), 0);
    }

    #[tokio::test]
    async fn remove_unknown_document_is_not_found() {
        let h = harness();
        let err = h.ingestor.remove(DocumentId(42)).await.unwrap_err();
        assert!(matches!(err, StudyError::NotFound(_)));
    }
}
