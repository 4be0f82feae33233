//! Error taxonomy for uploads, ingestion and chat turns.
//!
//! Validation errors come back synchronously from
//! [`Orchestrator::submit_document`](crate::orchestrator::Orchestrator::submit_document).
//! Pipeline errors are recorded on the document and logged. Chat-turn errors
//! end up as assistant messages. Configuration, CLI and server bootstrap use
//! `anyhow` instead.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Why text extraction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionFailure {
    /// Unreadable container, malformed structure, or no text at all.
    Corrupt,
    PasswordProtected,
    /// Text that is neither UTF-8 nor BOM-marked UTF-16.
    UnsupportedEncoding,
    Timeout,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionFailure::Corrupt => "corrupt",
            ExtractionFailure::PasswordProtected => "password-protected",
            ExtractionFailure::UnsupportedEncoding => "unsupported-encoding",
            ExtractionFailure::Timeout => "timeout",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StudyError {
    #[error("file is {size} bytes, larger than the {limit} byte upload limit")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("extraction failed ({kind}): {detail}")]
    ExtractionFailed {
        kind: ExtractionFailure,
        detail: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("a question is already being answered in this session")]
    TurnInProgress,

    #[error("indexing failed: {0}")]
    IndexingFailed(String),

    #[error("question must not be empty")]
    EmptyQuestion,
}

impl StudyError {
    pub fn extraction(kind: ExtractionFailure, detail: impl Into<String>) -> Self {
        StudyError::ExtractionFailed {
            kind,
            detail: detail.into(),
        }
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            StudyError::SizeExceeded { .. } => "size_exceeded",
            StudyError::UnsupportedType(_) => "unsupported_type",
            StudyError::ExtractionFailed { .. } => "extraction_failed",
            StudyError::NotFound(_) => "not_found",
            StudyError::TurnInProgress => "turn_in_progress",
            StudyError::IndexingFailed(_) => "indexing_failed",
            StudyError::EmptyQuestion => "empty_question",
        }
    }
}

pub type Result<T> = std::result::Result<T, StudyError>;
