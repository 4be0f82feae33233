//! Core data models shared by the ingestion and question-answering pipeline.
//!
//! Documents and chunks describe what has been uploaded and indexed; chat
//! messages and source references describe what the assistant said and where
//! it found it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable document identifier, allocated from a monotonic counter.
///
/// Ordering follows upload order, which is what retrieval uses to break
/// score ties deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(DocumentId)
    }
}

/// File formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Txt,
    Doc,
    Docx,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::Pdf,
        DocumentKind::Txt,
        DocumentKind::Doc,
        DocumentKind::Docx,
    ];

    /// Match a bare extension (no dot), case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::Txt),
            "doc" => Some(DocumentKind::Doc),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }

    /// Extension of a file name, lowercased, or `None` when it has none.
    pub fn extension_of(name: &str) -> Option<String> {
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Txt => "txt",
            DocumentKind::Doc => "doc",
            DocumentKind::Docx => "docx",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Ingestion status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    /// `Ready` and `Failed` end a pipeline run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::Failed)
    }
}

/// An uploaded document as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub size_bytes: u64,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    /// Failure detail, present only when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// SHA-256 of the uploaded bytes.
    pub content_hash: String,
    pub uploaded_at: DateTime<Utc>,
    /// Chunks committed to the index by the last successful run.
    pub chunk_count: usize,
}

/// Where a piece of text came from inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Locator {
    /// 1-based page number.
    Page { page: u32 },
    /// Character offsets into the normalized extracted text, end exclusive.
    Offset { start: usize, end: usize },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Page { page } => write!(f, "Page {}", page),
            Locator::Offset { start, end } => write!(f, "Chars {}-{}", start, end),
        }
    }
}

/// One unit of extractor output: a PDF page or a whole text body.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub locator: Locator,
}

/// A chunk of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub text: String,
    pub locator: Locator,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A (document name, locator) pair cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_name: String,
    pub locator: Locator,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.document_name, self.locator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single message in a study session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    /// True while an assistant answer is still being produced.
    #[serde(default)]
    pub pending: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text.into(), Vec::new(), false)
    }

    pub fn assistant(text: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self::new(ChatRole::Assistant, text.into(), sources, false)
    }

    /// Placeholder for an answer that has not been composed yet.
    pub fn pending_assistant() -> Self {
        Self::new(ChatRole::Assistant, String::new(), Vec::new(), true)
    }

    fn new(role: ChatRole, text: String, sources: Vec<SourceRef>, pending: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text,
            timestamp: Utc::now(),
            sources,
            pending,
        }
    }
}
