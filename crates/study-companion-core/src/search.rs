//! Retrieval: rank indexed chunks against a natural-language question.
//!
//! The retrieval algorithm operates entirely through the [`ChunkStore`]
//! trait, with no configuration or scheduling dependencies. The calling
//! application decides which documents are visible (only `ready` ones) and
//! passes them in with the tuning parameters.
//!
//! # Ranking
//!
//! 1. Tokenize the query (lowercase, stop-words dropped, light stemming).
//! 2. Score chunks of visible documents with BM25.
//! 3. Drop chunks scoring below `relevance_threshold`.
//! 4. Sort by score (desc), document ID (asc), chunk index (asc).
//! 5. Truncate to `k`.

use std::collections::HashSet;

use anyhow::Result;

use crate::models::DocumentId;
use crate::store::{ChunkStore, ScoredChunk};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Maximum number of chunks to return.
    pub k: usize,
    /// Minimum BM25 score a chunk needs to be returned.
    pub relevance_threshold: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: 4,
            relevance_threshold: 0.0,
        }
    }
}

/// Bundles all inputs for a single retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    /// The user's question.
    pub query: &'a str,
    /// Documents whose chunks may be returned.
    pub visible: &'a HashSet<DocumentId>,
    pub params: RetrievalParams,
}

/// Retrieve the top-k chunks for a query.
///
/// Returns an empty vector, not an error, when the query has no searchable
/// terms, nothing is indexed, or nothing clears the threshold.
pub async fn retrieve<S: ChunkStore + ?Sized>(
    store: &S,
    req: &RetrievalRequest<'_>,
) -> Result<Vec<ScoredChunk>> {
    if req.query.trim().is_empty() || req.params.k == 0 || req.visible.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = store
        .keyword_search(req.query, req.params.k, req.visible)
        .await?;

    let mut results: Vec<ScoredChunk> = candidates
        .into_iter()
        .filter(|c| c.score > 0.0 && c.score >= req.params.relevance_threshold)
        .filter(|c| req.visible.contains(&c.chunk.document_id))
        .collect();

    results.sort_by(|a, b| a.rank_cmp(b));
    results.truncate(req.params.k);
    Ok(results)
}
