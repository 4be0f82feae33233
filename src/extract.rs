//! Text extraction for uploaded documents (PDF, plain text, DOC, DOCX).
//!
//! Extraction turns raw bytes into [`Segment`]s: one per PDF page with a
//! page locator, or one for the whole body of a text or Word document with a
//! character-offset locator. Failures are reported as
//! [`StudyError::ExtractionFailed`] with an [`ExtractionFailure`] subkind and
//! never panic out of this module.
//!
//! Parsers are CPU-bound, so the pipeline calls [`extract_with_deadline`],
//! which runs them on a blocking worker bounded by the configured timeout.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use quick_xml::events::Event;
use study_companion_core::models::{DocumentKind, Locator, Segment};

use crate::error::{ExtractionFailure, Result, StudyError};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// OLE compound file signature, used by legacy `.doc` and encrypted OOXML.
const CFB_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
/// Shortest run of readable characters salvaged from a legacy `.doc`.
const MIN_SALVAGED_RUN: usize = 20;

fn corrupt(detail: impl Into<String>) -> StudyError {
    StudyError::extraction(ExtractionFailure::Corrupt, detail)
}

/// Extract text segments from `bytes`, dispatching on the document kind.
pub fn extract(bytes: &[u8], kind: DocumentKind) -> Result<Vec<Segment>> {
    let segments = match kind {
        DocumentKind::Pdf => extract_pdf(bytes)?,
        DocumentKind::Txt => vec![offset_segment(decode_text(bytes)?)],
        DocumentKind::Doc | DocumentKind::Docx => vec![offset_segment(extract_word(bytes)?)],
    };
    if segments.iter().all(|s| s.text.trim().is_empty()) {
        return Err(corrupt("no extractable text"));
    }
    Ok(segments)
}

/// Run [`extract`] on a blocking worker, failing with a `timeout` subkind
/// after `deadline`.
pub async fn extract_with_deadline(
    bytes: Arc<Vec<u8>>,
    kind: DocumentKind,
    deadline: Duration,
) -> Result<Vec<Segment>> {
    run_with_deadline(deadline, move || extract(&bytes, kind)).await
}

/// Run a blocking extraction closure under a deadline.
///
/// A panic inside the closure is reported as `corrupt`. On timeout the worker
/// thread is left to finish on its own; its result is discarded.
pub async fn run_with_deadline<T, F>(deadline: Duration, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(corrupt(format!("extractor crashed: {}", join_err))),
        Err(_) => Err(StudyError::extraction(
            ExtractionFailure::Timeout,
            format!("extraction took longer than {} ms", deadline.as_millis()),
        )),
    }
}

fn offset_segment(text: String) -> Segment {
    let end = text.chars().count();
    Segment {
        text,
        locator: Locator::Offset { start: 0, end },
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Segment>> {
    let head = &bytes[..bytes.len().min(1024)];
    if !head.windows(5).any(|w| w == b"%PDF-") {
        return Err(corrupt("missing %PDF header"));
    }
    if contains(bytes, b"/Encrypt") {
        return Err(StudyError::extraction(
            ExtractionFailure::PasswordProtected,
            "PDF is encrypted",
        ));
    }

    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| corrupt("PDF parser crashed"))?
        .map_err(|e| corrupt(format!("PDF extraction failed: {}", e)))?;

    Ok(pages
        .iter()
        .enumerate()
        .filter_map(|(i, page)| {
            let text = normalize_newlines(page).trim().to_string();
            (!text.is_empty()).then(|| Segment {
                text,
                locator: Locator::Page { page: i as u32 + 1 },
            })
        })
        .collect())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ============ Plain text ============

/// Decode plain text: UTF-8 (with or without BOM) or BOM-marked UTF-16.
fn decode_text(bytes: &[u8]) -> Result<String> {
    let unsupported = |detail: &str| {
        StudyError::extraction(ExtractionFailure::UnsupportedEncoding, detail.to_string())
    };

    let text = if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        std::str::from_utf8(rest)
            .map_err(|_| unsupported("invalid UTF-8 after byte order mark"))?
            .to_string()
    } else if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        decode_utf16(rest, u16::from_le_bytes).ok_or_else(|| unsupported("invalid UTF-16LE"))?
    } else if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        decode_utf16(rest, u16::from_be_bytes).ok_or_else(|| unsupported("invalid UTF-16BE"))?
    } else {
        if bytes.contains(&0) {
            return Err(unsupported("binary content (NUL bytes) in text file"));
        }
        std::str::from_utf8(bytes)
            .map_err(|_| unsupported("text is not valid UTF-8"))?
            .to_string()
    };

    Ok(normalize_newlines(&text))
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<std::result::Result<String, _>>().ok()
}

// ============ Word ============

/// DOCX, or DOC that is really OOXML, or a legacy OLE Word binary.
fn extract_word(bytes: &[u8]) -> Result<String> {
    if bytes.starts_with(ZIP_MAGIC) {
        return extract_docx(bytes);
    }
    if bytes.starts_with(&CFB_MAGIC) {
        if contains(bytes, &utf16le("EncryptedPackage")) {
            return Err(StudyError::extraction(
                ExtractionFailure::PasswordProtected,
                "document is encrypted",
            ));
        }
        return salvage_legacy_doc(bytes);
    }
    Err(corrupt("not a Word document"))
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|_| corrupt(format!("{} not found", name)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| corrupt(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(corrupt(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| corrupt(format!("unreadable DOCX container: {}", e)))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    let paragraphs = extract_paragraphs(&xml)?;
    Ok(paragraphs.join("\n\n"))
}

/// Collect the text of each `w:p` paragraph from `w:t` runs, with `w:tab`
/// as a tab and `w:br`/`w:cr` as a line break. Empty paragraphs are dropped.
fn extract_paragraphs(xml: &[u8]) -> Result<Vec<String>> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| corrupt(format!("bad text in document.xml: {}", e)))?;
                current.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt(format!("malformed document.xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs)
}

/// Recover readable text from a legacy Word binary.
///
/// Word 97-2003 stores body text either as 8-bit characters or as UTF-16LE.
/// Both encodings are scanned for runs of printable characters; runs that
/// are long enough and contain a space are kept, in file order.
fn salvage_legacy_doc(bytes: &[u8]) -> Result<String> {
    let mut runs: Vec<(usize, String)> = Vec::new();

    let mut current = String::new();
    let mut run_start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if is_text_byte(b) {
            if current.is_empty() {
                run_start = i;
            }
            current.push(b as char);
        } else {
            flush_run(&mut current, run_start, &mut runs);
        }
    }
    flush_run(&mut current, run_start, &mut runs);

    for align in 0..2 {
        let mut current = String::new();
        let mut run_start = 0;
        for (i, pair) in bytes[align.min(bytes.len())..].chunks_exact(2).enumerate() {
            if pair[1] == 0 && is_text_byte(pair[0]) {
                if current.is_empty() {
                    run_start = align + i * 2;
                }
                current.push(pair[0] as char);
            } else {
                flush_run(&mut current, run_start, &mut runs);
            }
        }
        flush_run(&mut current, run_start, &mut runs);
    }

    runs.sort_by_key(|(offset, _)| *offset);
    let text = runs
        .into_iter()
        .map(|(_, run)| run)
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.is_empty() {
        return Err(corrupt("no readable text in legacy Word document"));
    }
    Ok(text)
}

fn is_text_byte(b: u8) -> bool {
    (0x20..0x7F).contains(&b) || b == b'\t' || b == b'\r' || b == b'\n'
}

fn flush_run(current: &mut String, start: usize, runs: &mut Vec<(usize, String)>) {
    let run = normalize_newlines(current.trim());
    if run.chars().count() >= MIN_SALVAGED_RUN && run.contains(' ') {
        runs.push((start, run));
    }
    current.clear();
}
