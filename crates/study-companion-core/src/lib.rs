//! # Study Companion Core
//!
//! Shared, WASM-safe logic for Study Companion: data models, chunking,
//! tokenization, the chunk store abstraction, retrieval ranking, and answer
//! composition.
//!
//! This crate contains no tokio, filesystem I/O, or other native-only
//! dependencies. Extraction, scheduling, sessions, and the HTTP surface live
//! in the `study-companion` application crate.

pub mod answer;
pub mod chunk;
pub mod models;
pub mod search;
pub mod store;
pub mod tokenize;
