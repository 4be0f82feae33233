//! TOML configuration.
//!
//! Every section and key is optional; a missing file section falls back to
//! the defaults below, and [`Config::default`] is used when no config file is
//! given at all.
//!
//! ```toml
//! [upload]
//! max_upload_bytes = 20971520
//! allowed_types = ["pdf", "txt", "doc", "docx"]
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap_ratio = 0.15
//!
//! [retrieval]
//! retrieval_k = 4
//! relevance_threshold = 0.0
//!
//! [ingest]
//! extraction_timeout_ms = 60000
//! max_concurrent_ingests = 4
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use study_companion_core::chunk::{ChunkParams, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP_RATIO};
use study_companion_core::models::DocumentKind;
use study_companion_core::search::RetrievalParams;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_max_upload_bytes() -> u64 {
    20 * 1024 * 1024
}
fn default_allowed_types() -> Vec<String> {
    DocumentKind::ALL
        .iter()
        .map(|k| k.extension().to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChunkingConfig {
    /// Window length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap_ratio")]
    pub chunk_overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap_ratio: default_overlap_ratio(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap_ratio() -> f64 {
    DEFAULT_OVERLAP_RATIO
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default)]
    pub relevance_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_k: default_retrieval_k(),
            relevance_threshold: 0.0,
        }
    }
}

fn default_retrieval_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct IngestConfig {
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_ingests")]
    pub max_concurrent_ingests: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extraction_timeout_ms: default_extraction_timeout_ms(),
            max_concurrent_ingests: default_max_concurrent_ingests(),
        }
    }
}

fn default_extraction_timeout_ms() -> u64 {
    60_000
}
fn default_max_concurrent_ingests() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    pub fn chunk_params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunking.chunk_size,
            overlap_ratio: self.chunking.chunk_overlap_ratio,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.retrieval.retrieval_k,
            relevance_threshold: self.retrieval.relevance_threshold,
        }
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest.extraction_timeout_ms)
    }

    /// Check value ranges. Called by [`load_config`]; call it yourself when
    /// building a `Config` in code.
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_upload_bytes == 0 {
            anyhow::bail!("upload.max_upload_bytes must be > 0");
        }
        if self.upload.allowed_types.is_empty() {
            anyhow::bail!("upload.allowed_types must not be empty");
        }
        for ty in &self.upload.allowed_types {
            if DocumentKind::from_extension(ty).is_none() {
                anyhow::bail!(
                    "Unknown upload type: '{}'. Must be one of pdf, txt, doc, docx.",
                    ty
                );
            }
        }

        if self.chunking.chunk_size < 64 {
            anyhow::bail!("chunking.chunk_size must be >= 64");
        }
        if !(0.0..=0.5).contains(&self.chunking.chunk_overlap_ratio) {
            anyhow::bail!("chunking.chunk_overlap_ratio must be in [0.0, 0.5]");
        }

        if self.retrieval.retrieval_k < 1 {
            anyhow::bail!("retrieval.retrieval_k must be >= 1");
        }
        let threshold = self.retrieval.relevance_threshold;
        if threshold.is_nan() || threshold < 0.0 {
            anyhow::bail!("retrieval.relevance_threshold must be >= 0.0");
        }

        if self.ingest.extraction_timeout_ms == 0 {
            anyhow::bail!("ingest.extraction_timeout_ms must be > 0");
        }
        if self.ingest.max_concurrent_ingests < 1 {
            anyhow::bail!("ingest.max_concurrent_ingests must be >= 1");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` when given, otherwise use the defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => Ok(Config::default()),
    }
}
