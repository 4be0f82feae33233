//! Study progress statistics and recommended next actions.
//!
//! Counts come from the document store, the chunk index, and the
//! orchestrator's session and question counters. The recommendations nudge a
//! new user through upload, then asking, then cleaning up failures.

use serde::Serialize;
use study_companion_core::models::{Document, DocumentStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyStats {
    /// Documents that reached `ready`.
    pub documents_processed: usize,
    pub documents_failed: usize,
    /// Documents still `pending` or `processing`.
    pub documents_in_flight: usize,
    pub questions_asked: u64,
    pub study_sessions: usize,
    pub indexed_chunks: usize,
    /// Total upload size of ready documents.
    pub indexed_bytes: u64,
    pub recommended_actions: Vec<String>,
}

impl StudyStats {
    pub fn collect(
        documents: &[Document],
        indexed_chunks: usize,
        questions_asked: u64,
        study_sessions: usize,
    ) -> Self {
        let count = |status: DocumentStatus| documents.iter().filter(|d| d.status == status).count();
        let documents_processed = count(DocumentStatus::Ready);
        let documents_failed = count(DocumentStatus::Failed);
        let documents_in_flight = documents.len() - documents_processed - documents_failed;
        let indexed_bytes = documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Ready)
            .map(|d| d.size_bytes)
            .sum();

        let mut stats = Self {
            documents_processed,
            documents_failed,
            documents_in_flight,
            questions_asked,
            study_sessions,
            indexed_chunks,
            indexed_bytes,
            recommended_actions: Vec::new(),
        };
        stats.recommended_actions = recommended_actions(&stats);
        stats
    }

    /// Multi-line summary for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Study Progress\n");
        out.push_str(&format!(
            "  Documents processed: {} ({})\n",
            self.documents_processed,
            format_bytes(self.indexed_bytes)
        ));
        if self.documents_failed > 0 {
            out.push_str(&format!("  Documents failed:    {}\n", self.documents_failed));
        }
        out.push_str(&format!("  Questions asked:     {}\n", self.questions_asked));
        out.push_str(&format!("  Study sessions:      {}\n", self.study_sessions));
        if !self.recommended_actions.is_empty() {
            out.push_str("Recommended Actions\n");
            for action in &self.recommended_actions {
                out.push_str(&format!("  • {}\n", action));
            }
        }
        out
    }
}

fn recommended_actions(stats: &StudyStats) -> Vec<String> {
    let mut actions = Vec::new();
    if stats.documents_processed == 0 && stats.documents_in_flight == 0 {
        actions.push("Upload your first document to get started".to_string());
    }
    if stats.questions_asked == 0 {
        if stats.documents_processed == 0 {
            actions.push("Try asking about key concepts once you upload materials".to_string());
        } else {
            actions.push("Try asking about key concepts in your materials".to_string());
        }
    }
    if stats.documents_failed > 0 {
        actions.push("Remove or re-upload documents that failed to process".to_string());
    }
    actions
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
