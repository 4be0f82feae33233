//! # StudyMate CLI (`studymate`)
//!
//! Runs the study companion as an HTTP service, or answers a one-off
//! question about local files straight from the terminal.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `studymate serve` | Start the HTTP API |
//! | `studymate ask "<question>" --file <path>` | Ingest files and answer one question |
//! | `studymate extract <file>` | Show the text and locators extracted from a file |
//! | `studymate completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Serve the API with a custom config
//! studymate --config ./studymate.toml serve
//!
//! # Ask about a folder of lecture notes
//! studymate ask "What is the Krebs cycle?" --file ./notes/
//!
//! # Debug extraction of a PDF
//! studymate extract ./slides/week3.pdf
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to change verbosity.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use study_companion::config::{load_or_default, Config};
use study_companion::extract;
use study_companion::orchestrator::Orchestrator;
use study_companion::server;
use study_companion::stats::format_bytes;
use study_companion_core::models::{DocumentKind, DocumentStatus};

/// Ask questions about your study materials and get answers with sources.
#[derive(Parser)]
#[command(
    name = "studymate",
    about = "StudyMate: ask questions about your study materials and get answers with sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Optional; built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind` and serves until interrupted.
    Serve,

    /// Ingest local files and answer one question about them.
    ///
    /// Directories are walked recursively; files with unsupported
    /// extensions are skipped.
    Ask {
        /// The question to answer.
        question: String,

        /// Files or directories to ingest. Repeatable.
        #[arg(long = "file", short = 'f', required = true)]
        files: Vec<PathBuf>,

        /// Seconds to wait for ingestion before answering anyway.
        #[arg(long, default_value_t = 120)]
        wait_secs: u64,
    },

    /// Print the text segments extracted from a file.
    Extract {
        /// Path to a PDF, TXT, DOC, or DOCX file.
        file: PathBuf,
    },

    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "studymate", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            let orchestrator = Arc::new(Orchestrator::new(config));
            server::run_server(orchestrator).await?;
        }
        Commands::Ask {
            question,
            files,
            wait_secs,
        } => {
            run_ask(config, &question, &files, Duration::from_secs(wait_secs)).await?;
        }
        Commands::Extract { file } => {
            run_extract(&config, &file).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Expand files and directories into the list of uploadable files.
fn collect_files(inputs: &[PathBuf], allowed: &[String]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        if !input.exists() {
            bail!("No such file or directory: {}", input.display());
        }
        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", input.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let supported = DocumentKind::extension_of(&name)
                .map(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
                .unwrap_or(false);
            if supported || entry.depth() == 0 {
                out.push(entry.into_path());
            }
        }
    }
    Ok(out)
}

async fn run_ask(config: Config, question: &str, inputs: &[PathBuf], wait: Duration) -> Result<()> {
    let files = collect_files(inputs, &config.upload.allowed_types)?;
    let studymate = Orchestrator::new(config);

    let mut submitted = Vec::new();
    for path in &files {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let size = bytes.len() as u64;
        let name = path.to_string_lossy();
        match studymate.submit_document(bytes, &name, size) {
            Ok(doc) => submitted.push(doc),
            Err(e) => eprintln!("Skipping {}: {}", path.display(), e),
        }
    }
    if submitted.is_empty() {
        eprintln!("No documents were accepted; answering without study materials.");
    }

    for doc in &submitted {
        let doc = studymate.wait_for_document(doc.id, wait).await?;
        match doc.status {
            DocumentStatus::Ready => {
                println!("✓ {} ({} chunks)", doc.name, doc.chunk_count);
            }
            DocumentStatus::Failed => {
                println!("✗ {}: {}", doc.name, doc.error.unwrap_or_default());
            }
            _ => println!("… {} still processing after {}s", doc.name, wait.as_secs()),
        }
    }

    let session = studymate.create_session();
    let turn = studymate.submit_question(session.id, question).await?;

    println!();
    println!("{}", turn.answer_text);
    if !turn.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &turn.sources {
            println!("  - {}", source);
        }
    }
    println!();
    print!("{}", studymate.stats().await.render());

    Ok(())
}

async fn run_extract(config: &Config, path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = DocumentKind::extension_of(&name)
        .and_then(|ext| DocumentKind::from_extension(&ext))
        .with_context(|| format!("Unsupported file type: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    println!("{} ({}, {})", name, kind, format_bytes(bytes.len() as u64));
    let segments =
        extract::extract_with_deadline(Arc::new(bytes), kind, config.extraction_timeout()).await?;
    for segment in &segments {
        println!();
        println!("[{}] {} chars", segment.locator, segment.text.chars().count());
        println!("{}", segment.text);
    }

    Ok(())
}
