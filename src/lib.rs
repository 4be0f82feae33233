//! # Study Companion
//!
//! The backend of a document-based study assistant. Users upload PDFs,
//! Word documents, and text files; the companion extracts and indexes their
//! text in the background and answers questions with passages quoted from
//! the materials and the sources they came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ DocumentStore│──▶│ Extractor  │──▶│ Chunker +    │──▶│ BM25 index  │
//! │ (uploads)    │   │ pdf/doc/txt│   │ Ingestor     │   │ (in memory) │
//! └──────────────┘   └────────────┘   └──────────────┘   └──────┬──────┘
//!                                                               │
//!        ┌──────────────┐   ┌─────────────┐   ┌───────────┐     │
//!        │ Orchestrator │──▶│ Session turn│──▶│ Retriever │◀────┘
//!        │ (HTTP / CLI) │   │ state       │   │ + Composer│
//!        └──────────────┘   └─────────────┘   └───────────┘
//! ```
//!
//! Chunking, the index, retrieval ranking, and answer composition live in
//! the `study-companion-core` crate; this crate adds extraction, scheduling,
//! sessions, configuration, and the HTTP and CLI surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Domain error taxonomy |
//! | [`extract`] | Text extraction from PDF, TXT, DOC, DOCX |
//! | [`documents`] | Uploaded documents and their status |
//! | [`ingest`] | Background extract → chunk → index pipeline |
//! | [`session`] | Chat sessions and the turn state machine |
//! | [`orchestrator`] | In-process API tying it all together |
//! | [`events`] | Broadcast of document and message changes |
//! | [`stats`] | Study progress and recommended actions |
//! | [`server`] | JSON HTTP API |

pub mod config;
pub mod documents;
pub mod error;
pub mod events;
pub mod extract;
pub mod ingest;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod stats;
