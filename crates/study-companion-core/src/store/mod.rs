//! Chunk storage and lexical index abstraction.
//!
//! The [`ChunkStore`] trait defines every operation the retrieval pipeline
//! needs from an index backend, so the ingestion side can swap the bundled
//! [`memory::InMemoryStore`] for a persistent one without touching retrieval.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must make every write visible atomically per document: a concurrent
//! [`keyword_search`](ChunkStore::keyword_search) sees either all or none of
//! a document's replaced chunks.

pub mod memory;

use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, DocumentId};

/// A chunk together with its relevance score for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// BM25 score; higher is more relevant.
    pub score: f64,
}

impl ScoredChunk {
    /// Ranking order: score descending, then document ID ascending, then
    /// chunk index ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then(self.chunk.document_id.cmp(&other.chunk.document_id))
            .then(self.chunk.chunk_index.cmp(&other.chunk.chunk_index))
    }
}

/// Counters describing the current index contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    pub terms: usize,
}

/// Abstract chunk index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_document`](ChunkStore::replace_document) | Atomically replace all chunks of a document |
/// | [`purge_document`](ChunkStore::purge_document) | Remove all chunks of a document |
/// | [`document_chunks`](ChunkStore::document_chunks) | List a document's chunks in order |
/// | [`keyword_search`](ChunkStore::keyword_search) | Score chunks of visible documents against a query |
/// | [`stats`](ChunkStore::stats) | Index counters |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace every chunk of `doc_id` with `chunks`. Returns the number of
    /// chunks now indexed for the document.
    async fn replace_document(&self, doc_id: DocumentId, chunks: Vec<Chunk>) -> Result<usize>;

    /// Remove every chunk of `doc_id`. Returns the number removed; purging
    /// an unknown document is not an error.
    async fn purge_document(&self, doc_id: DocumentId) -> Result<usize>;

    /// All chunks of `doc_id`, ordered by chunk index.
    async fn document_chunks(&self, doc_id: DocumentId) -> Result<Vec<Chunk>>;

    /// Score chunks whose document is in `visible` against `query`.
    ///
    /// Returns at most `limit` chunks with a positive score, in
    /// [`ScoredChunk::rank_cmp`] order.
    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        visible: &HashSet<DocumentId>,
    ) -> Result<Vec<ScoredChunk>>;

    async fn stats(&self) -> Result<StoreStats>;
}
