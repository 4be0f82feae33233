//! In-memory [`ChunkStore`] with a BM25 inverted index.
//!
//! All postings live behind a single `parking_lot::RwLock`. Writers replace
//! or purge a whole document under one write guard and searches score under
//! one read guard, which gives every search a consistent snapshot: a
//! document's chunks are visible all together or not at all.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::models::{Chunk, DocumentId};
use crate::tokenize;

use super::{ChunkStore, ScoredChunk, StoreStats};

/// BM25 term-frequency saturation.
const K1: f64 = 1.2;
/// BM25 length normalization.
const B: f64 = 0.75;

struct IndexedChunk {
    chunk: Chunk,
    term_freqs: HashMap<String, u32>,
    length: usize,
}

#[derive(Default)]
struct IndexState {
    docs: BTreeMap<DocumentId, Vec<IndexedChunk>>,
    /// Number of chunks containing each term.
    doc_freq: HashMap<String, usize>,
    total_chunks: usize,
    total_length: usize,
}

impl IndexState {
    fn insert(&mut self, doc_id: DocumentId, chunks: Vec<Chunk>) -> usize {
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let terms = tokenize::terms(&chunk.text);
            let length = terms.len();
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *term_freqs.entry(term).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            self.total_chunks += 1;
            self.total_length += length;
            entries.push(IndexedChunk {
                chunk,
                term_freqs,
                length,
            });
        }
        entries.sort_by_key(|e| e.chunk.chunk_index);
        let count = entries.len();
        self.docs.insert(doc_id, entries);
        count
    }

    fn remove(&mut self, doc_id: DocumentId) -> usize {
        let Some(entries) = self.docs.remove(&doc_id) else {
            return 0;
        };
        for entry in &entries {
            for term in entry.term_freqs.keys() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df -= 1;
                    if *df == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
            self.total_chunks -= 1;
            self.total_length -= entry.length;
        }
        entries.len()
    }
}

/// In-memory chunk index for the application and for tests.
pub struct InMemoryStore {
    state: RwLock<IndexState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn replace_document(&self, doc_id: DocumentId, chunks: Vec<Chunk>) -> Result<usize> {
        if let Some(stray) = chunks.iter().find(|c| c.document_id != doc_id) {
            anyhow::bail!(
                "chunk {} belongs to document {}, not {}",
                stray.id,
                stray.document_id,
                doc_id
            );
        }
        let mut state = self.state.write();
        state.remove(doc_id);
        Ok(state.insert(doc_id, chunks))
    }

    async fn purge_document(&self, doc_id: DocumentId) -> Result<usize> {
        Ok(self.state.write().remove(doc_id))
    }

    async fn document_chunks(&self, doc_id: DocumentId) -> Result<Vec<Chunk>> {
        let state = self.state.read();
        Ok(state
            .docs
            .get(&doc_id)
            .map(|entries| entries.iter().map(|e| e.chunk.clone()).collect())
            .unwrap_or_default())
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        visible: &HashSet<DocumentId>,
    ) -> Result<Vec<ScoredChunk>> {
        let query_terms = tokenize::unique_terms(query);
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        if state.total_chunks == 0 {
            return Ok(Vec::new());
        }

        let n = state.total_chunks as f64;
        let avg_len = (state.total_length as f64 / n).max(1.0);
        let weighted: Vec<(&str, f64)> = query_terms
            .iter()
            .filter_map(|t| {
                let df = *state.doc_freq.get(t)? as f64;
                let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                Some((t.as_str(), idf))
            })
            .collect();
        if weighted.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<ScoredChunk> = state
            .docs
            .iter()
            .filter(|(doc_id, _)| visible.contains(*doc_id))
            .flat_map(|(_, entries)| entries.iter())
            .filter_map(|entry| {
                let norm = K1 * (1.0 - B + B * entry.length as f64 / avg_len);
                let score: f64 = weighted
                    .iter()
                    .filter_map(|(term, idf)| {
                        let tf = *entry.term_freqs.get(*term)? as f64;
                        Some(idf * tf * (K1 + 1.0) / (tf + norm))
                    })
                    .sum();
                (score > 0.0).then(|| ScoredChunk {
                    chunk: entry.chunk.clone(),
                    score,
                })
            })
            .collect();

        candidates.sort_by(|a, b| a.rank_cmp(b));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.state.read();
        Ok(StoreStats {
            documents: state.docs.len(),
            chunks: state.total_chunks,
            terms: state.doc_freq.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_segments, ChunkParams};
    use crate::models::{Locator, Segment};

    fn chunks_for(doc: u64, texts: &[&str]) -> Vec<Chunk> {
        let segments: Vec<Segment> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Segment {
                text: t.to_string(),
                locator: Locator::Page { page: i as u32 + 1 },
            })
            .collect();
        chunk_segments(DocumentId(doc), &segments, &ChunkParams::default())
    }

    fn all(ids: &[u64]) -> HashSet<DocumentId> {
        ids.iter().map(|i| DocumentId(*i)).collect()
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let store = InMemoryStore::new();
        let chunks = chunks_for(1, &["Mitochondria produce ATP.", "Ribosomes build proteins."]);
        store.replace_document(DocumentId(1), chunks.clone()).await.unwrap();
        let first = store.document_chunks(DocumentId(1)).await.unwrap();
        let stats_once = store.stats().await.unwrap();

        store.replace_document(DocumentId(1), chunks).await.unwrap();
        let second = store.document_chunks(DocumentId(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.stats().await.unwrap(), stats_once);
        assert_eq!(stats_once.chunks, 2);
    }

    #[tokio::test]
    async fn test_purge_removes_postings() {
        let store = InMemoryStore::new();
        store
            .replace_document(DocumentId(1), chunks_for(1, &["osmosis moves water"]))
            .await
            .unwrap();
        store
            .replace_document(DocumentId(2), chunks_for(2, &["diffusion moves solutes"]))
            .await
            .unwrap();

        assert_eq!(store.purge_document(DocumentId(1)).await.unwrap(), 1);
        assert_eq!(store.purge_document(DocumentId(1)).await.unwrap(), 0);

        let hits = store.keyword_search("osmosis", 10, &all(&[1, 2])).await.unwrap();
        assert!(hits.is_empty());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert!(stats.terms > 0);
    }

    #[tokio::test]
    async fn test_search_ranks_by_score() {
        let store = InMemoryStore::new();
        store
            .replace_document(
                DocumentId(1),
                chunks_for(1, &["cells cells cells divide by mitosis", "plants need sunlight"]),
            )
            .await
            .unwrap();
        let hits = store.keyword_search("mitosis in cells", 10, &all(&[1])).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.locator, Locator::Page { page: 1 });
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_ties_break_by_document_then_index() {
        let store = InMemoryStore::new();
        store
            .replace_document(DocumentId(2), chunks_for(2, &["enzyme kinetics", "enzyme kinetics"]))
            .await
            .unwrap();
        store
            .replace_document(DocumentId(1), chunks_for(1, &["enzyme kinetics"]))
            .await
            .unwrap();

        let hits = store.keyword_search("enzyme", 10, &all(&[1, 2])).await.unwrap();
        let order: Vec<(u64, usize)> = hits
            .iter()
            .map(|h| (h.chunk.document_id.0, h.chunk.chunk_index))
            .collect();
        assert_eq!(order, vec![(1, 0), (2, 0), (2, 1)]);
    }

    #[tokio::test]
    async fn test_invisible_documents_are_skipped() {
        let store = InMemoryStore::new();
        store
            .replace_document(DocumentId(1), chunks_for(1, &["glycolysis pathway"]))
            .await
            .unwrap();
        let hits = store.keyword_search("glycolysis", 10, &all(&[])).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_stop_word_query_matches_nothing() {
        let store = InMemoryStore::new();
        store
            .replace_document(DocumentId(1), chunks_for(1, &["what is this"]))
            .await
            .unwrap();
        let hits = store.keyword_search("what is", 10, &all(&[1])).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_chunk_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .replace_document(DocumentId(5), chunks_for(6, &["stray"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("belongs to document 6"));
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let store = InMemoryStore::new();
        let pages: Vec<String> = (0..10).map(|i| format!("vector calculus {}", i)).collect();
        let refs: Vec<&str> = pages.iter().map(|s| s.as_str()).collect();
        store
            .replace_document(DocumentId(1), chunks_for(1, &refs))
            .await
            .unwrap();
        let hits = store.keyword_search("calculus", 3, &all(&[1])).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.chunk_index, 0);
    }
}
