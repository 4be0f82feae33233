//! Answer composition from retrieved passages.
//!
//! [`AnswerComposer`] is the seam where a generative model could be plugged
//! in. The bundled [`ExtractiveComposer`] answers with the sentences of the
//! retrieved chunks that overlap the question most, and cites the chunks it
//! quoted.
//!
//! # Fallback convention
//!
//! When nothing was retrieved, every composer returns [`FALLBACK_ANSWER`]
//! with an empty source list and `grounded == false`. A grounded answer
//! always has at least one source.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, SourceRef};
use crate::tokenize;

/// Reply used when no passage could support an answer.
pub const FALLBACK_ANSWER: &str = "I couldn't find anything about that in your study materials. \
Upload your PDFs, Word documents, or text files, wait until they show as ready, and ask again.";

/// Longest quote taken from one sentence. Longer sentences (usually text
/// without punctuation) are cut to a window around the first matched term.
pub const MAX_QUOTE_CHARS: usize = 280;

/// A retrieved chunk with the display name of its document.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub document_name: String,
    pub chunk: Chunk,
    pub score: f64,
}

/// The outcome of composing an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedAnswer {
    pub text: String,
    /// Deduplicated sources in the order first referenced.
    pub sources: Vec<SourceRef>,
    /// False for the fallback answer.
    pub grounded: bool,
}

impl ComposedAnswer {
    pub fn fallback() -> Self {
        Self {
            text: FALLBACK_ANSWER.to_string(),
            sources: Vec::new(),
            grounded: false,
        }
    }
}

/// Turns a question and its ranked passages into an answer.
#[async_trait]
pub trait AnswerComposer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Compose an answer. `passages` are in rank order.
    async fn compose(&self, query: &str, passages: &[Passage]) -> Result<ComposedAnswer>;
}

/// Extractive composer: quotes the best-matching sentences.
#[derive(Debug, Clone)]
pub struct ExtractiveComposer {
    max_sentences: usize,
}

impl ExtractiveComposer {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

impl Default for ExtractiveComposer {
    fn default() -> Self {
        Self::new(3)
    }
}

struct Candidate<'a> {
    passage: usize,
    position: usize,
    overlap: usize,
    text: &'a str,
}

#[async_trait]
impl AnswerComposer for ExtractiveComposer {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn compose(&self, query: &str, passages: &[Passage]) -> Result<ComposedAnswer> {
        Ok(compose_extractive(query, passages, self.max_sentences))
    }
}

fn compose_extractive(query: &str, passages: &[Passage], max_sentences: usize) -> ComposedAnswer {
    if passages.is_empty() {
        return ComposedAnswer::fallback();
    }

    let query_terms: HashSet<String> = tokenize::unique_terms(query).into_iter().collect();

    let mut candidates: Vec<Candidate<'_>> = Vec::new();
    for (p, passage) in passages.iter().enumerate() {
        for (position, sentence) in split_sentences(&passage.chunk.text).into_iter().enumerate() {
            let overlap = tokenize::unique_terms(sentence)
                .iter()
                .filter(|t| query_terms.contains(*t))
                .count();
            candidates.push(Candidate {
                passage: p,
                position,
                overlap,
                text: sentence,
            });
        }
    }

    candidates.sort_by(|a, b| {
        b.overlap
            .cmp(&a.overlap)
            .then(a.passage.cmp(&b.passage))
            .then(a.position.cmp(&b.position))
    });

    let mut seen_text: HashSet<&str> = HashSet::new();
    let mut chosen: Vec<&Candidate<'_>> = candidates
        .iter()
        .filter(|c| c.overlap > 0)
        .filter(|c| seen_text.insert(c.text))
        .take(max_sentences)
        .collect();

    // Retrieval matched, but no single sentence shares a term with the
    // question: quote the opening of the best passage instead.
    if chosen.is_empty() {
        if let Some(first) = candidates
            .iter()
            .filter(|c| c.passage == 0)
            .min_by_key(|c| c.position)
        {
            chosen.push(first);
        }
    }
    if chosen.is_empty() {
        return ComposedAnswer::fallback();
    }

    chosen.sort_by(|a, b| a.passage.cmp(&b.passage).then(a.position.cmp(&b.position)));

    let text = chosen
        .iter()
        .map(|c| excerpt(c.text, &query_terms, MAX_QUOTE_CHARS))
        .collect::<Vec<_>>()
        .join(" ");

    let mut sources: Vec<SourceRef> = Vec::new();
    for c in &chosen {
        let passage = &passages[c.passage];
        let source = SourceRef {
            document_name: passage.document_name.clone(),
            locator: passage.chunk.locator,
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }

    ComposedAnswer {
        text,
        sources,
        grounded: true,
    }
}

/// Split text into trimmed sentences on `.`, `!`, `?` followed by whitespace,
/// and on line breaks.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                Some((_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                None => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Cut `sentence` to at most `max_chars` characters around the first word
/// matching a query term, marking cuts with an ellipsis. Cuts fall on
/// whitespace where possible.
fn excerpt(sentence: &str, query_terms: &HashSet<String>, max_chars: usize) -> String {
    if sentence.chars().count() <= max_chars {
        return sentence.to_string();
    }

    let mut anchor = 0;
    let mut word_start = None;
    for (i, c) in sentence.char_indices().chain(std::iter::once((sentence.len(), ' '))) {
        if !c.is_whitespace() {
            word_start.get_or_insert(i);
            continue;
        }
        if let Some(start) = word_start.take() {
            let matched = tokenize::terms(&sentence[start..i])
                .iter()
                .any(|t| query_terms.contains(t));
            if matched {
                anchor = start;
                break;
            }
        }
    }

    // Leave a little lead-in before the matched word.
    let anchor_chars = sentence[..anchor].chars().count();
    let lead_chars = anchor_chars.saturating_sub(max_chars / 4);
    let mut start = byte_offset(sentence, lead_chars);
    if start > 0 && start < anchor && !ends_with_whitespace(&sentence[..start]) {
        start = match sentence[start..anchor].find(char::is_whitespace) {
            Some(ws) => start + ws,
            None => anchor,
        };
    }
    let start = start + (sentence[start..].len() - sentence[start..].trim_start().len());

    let window_end = start + byte_offset(&sentence[start..], max_chars);
    let mut end = window_end;
    if end < sentence.len() {
        let window = &sentence[start..end];
        if let Some(ws) = window.rfind(char::is_whitespace) {
            if ws > window.len() / 2 {
                end = start + ws;
            }
        }
    }

    let mut out = String::new();
    if start > 0 {
        out.push_str("… ");
    }
    out.push_str(sentence[start..end].trim_end());
    if end < sentence.len() {
        out.push_str(" …");
    }
    out
}

/// Byte offset of the `n`th character, or the length if there are fewer.
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars().next_back().is_some_and(char::is_whitespace)
}
