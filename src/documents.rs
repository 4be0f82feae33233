//! Document store: uploaded files, their metadata, and ingestion status.
//!
//! Documents live in memory behind a `parking_lot::RwLock`, keyed by a
//! monotonic [`DocumentId`]. Raw bytes are shared with ingestion tasks through
//! an `Arc` so extraction never copies the upload.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use study_companion_core::models::{Document, DocumentId, DocumentKind, DocumentStatus};

use crate::config::UploadConfig;
use crate::error::{Result, StudyError};

struct StoredDocument {
    document: Document,
    bytes: Arc<Vec<u8>>,
}

pub struct DocumentStore {
    limits: UploadConfig,
    docs: RwLock<BTreeMap<DocumentId, StoredDocument>>,
    next_id: AtomicU64,
}

impl DocumentStore {
    pub fn new(limits: UploadConfig) -> Self {
        Self {
            limits,
            docs: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Check an upload against the size limit and the allowed types without
    /// storing anything. Returns the sanitized file name and its kind.
    pub fn validate(&self, name: &str, declared_size: u64) -> Result<(String, DocumentKind)> {
        if declared_size > self.limits.max_upload_bytes {
            return Err(StudyError::SizeExceeded {
                size: declared_size,
                limit: self.limits.max_upload_bytes,
            });
        }

        let file_name = Path::new(name.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        let ext = DocumentKind::extension_of(&file_name)
            .ok_or_else(|| StudyError::UnsupportedType(format!("{} (no extension)", file_name)))?;
        let allowed = self
            .limits
            .allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&ext));
        let kind = DocumentKind::from_extension(&ext)
            .filter(|_| allowed)
            .ok_or_else(|| StudyError::UnsupportedType(format!(".{}", ext)))?;

        Ok((file_name, kind))
    }

    /// Validate and store an upload. The new document is `pending`.
    pub fn add(&self, bytes: Vec<u8>, name: &str, declared_size: u64) -> Result<Document> {
        let (name, kind) = self.validate(name, declared_size)?;
        let actual = bytes.len() as u64;
        if actual > self.limits.max_upload_bytes {
            return Err(StudyError::SizeExceeded {
                size: actual,
                limit: self.limits.max_upload_bytes,
            });
        }

        let content_hash = format!("{:x}", Sha256::digest(&bytes));
        let id = DocumentId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let document = Document {
            id,
            name,
            size_bytes: actual,
            kind,
            status: DocumentStatus::Pending,
            error: None,
            content_hash,
            uploaded_at: Utc::now(),
            chunk_count: 0,
        };

        self.docs.write().insert(
            id,
            StoredDocument {
                document: document.clone(),
                bytes: Arc::new(bytes),
            },
        );
        Ok(document)
    }

    pub fn get(&self, id: DocumentId) -> Result<Document> {
        self.docs
            .read()
            .get(&id)
            .map(|s| s.document.clone())
            .ok_or_else(|| not_found(id))
    }

    /// All documents in upload order.
    pub fn list(&self) -> Vec<Document> {
        self.docs.read().values().map(|s| s.document.clone()).collect()
    }

    pub fn remove(&self, id: DocumentId) -> Result<Document> {
        self.docs
            .write()
            .remove(&id)
            .map(|s| s.document)
            .ok_or_else(|| not_found(id))
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.docs.read().contains_key(&id)
    }

    /// Raw upload bytes and kind, for the extractor.
    pub fn content(&self, id: DocumentId) -> Result<(Arc<Vec<u8>>, DocumentKind)> {
        self.docs
            .read()
            .get(&id)
            .map(|s| (Arc::clone(&s.bytes), s.document.kind))
            .ok_or_else(|| not_found(id))
    }

    /// Move a document to `pending` or `processing`, clearing any earlier
    /// failure detail.
    pub fn set_status(&self, id: DocumentId, status: DocumentStatus) -> Result<Document> {
        self.update(id, |doc| {
            doc.status = status;
            doc.error = None;
        })
    }

    pub fn mark_ready(&self, id: DocumentId, chunk_count: usize) -> Result<Document> {
        self.update(id, |doc| {
            doc.status = DocumentStatus::Ready;
            doc.error = None;
            doc.chunk_count = chunk_count;
        })
    }

    pub fn set_failed(&self, id: DocumentId, detail: impl Into<String>) -> Result<Document> {
        let detail = detail.into();
        self.update(id, |doc| {
            doc.status = DocumentStatus::Failed;
            doc.error = Some(detail);
            doc.chunk_count = 0;
        })
    }

    /// IDs of documents whose chunks may be retrieved.
    pub fn ready_ids(&self) -> HashSet<DocumentId> {
        self.docs
            .read()
            .values()
            .filter(|s| s.document.status == DocumentStatus::Ready)
            .map(|s| s.document.id)
            .collect()
    }

    fn update(&self, id: DocumentId, apply: impl FnOnce(&mut Document)) -> Result<Document> {
        let mut docs = self.docs.write();
        let stored = docs.get_mut(&id).ok_or_else(|| not_found(id))?;
        apply(&mut stored.document);
        Ok(stored.document.clone())
    }
}

fn not_found(id: DocumentId) -> StudyError {
    StudyError::NotFound(format!("document {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_limit(max_upload_bytes: u64) -> DocumentStore {
        DocumentStore::new(UploadConfig {
            max_upload_bytes,
            ..UploadConfig::default()
        })
    }

    #[test]
    fn test_add_assigns_monotonic_ids() {
        let store = store_with_limit(1024);
        let a = store.add(b"one".to_vec(), "a.txt", 3).unwrap();
        let b = store.add(b"two".to_vec(), "b.pdf", 3).unwrap();
        assert_eq!(a.id, DocumentId(1));
        assert_eq!(b.id, DocumentId(2));
        assert_eq!(a.status, DocumentStatus::Pending);
        assert_eq!(b.kind, DocumentKind::Pdf);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_size_limit_checks_declared_and_actual() {
        let store = store_with_limit(4);
        let err = store.add(b"ok".to_vec(), "a.txt", 5).unwrap_err();
        assert!(matches!(err, StudyError::SizeExceeded { size: 5, limit: 4 }));
        let err = store.add(b"too long".to_vec(), "a.txt", 2).unwrap_err();
        assert!(matches!(err, StudyError::SizeExceeded { size: 8, limit: 4 }));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_unsupported_types_rejected() {
        let store = store_with_limit(1024);
        for name in ["slides.pptx", "README", "archive.", "image.PNG"] {
            let err = store.add(b"x".to_vec(), name, 1).unwrap_err();
            assert!(matches!(err, StudyError::UnsupportedType(_)), "{}", name);
        }
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_allowed_types_respected() {
        let store = DocumentStore::new(UploadConfig {
            max_upload_bytes: 1024,
            allowed_types: vec!["txt".to_string()],
        });
        assert!(store.add(b"x".to_vec(), "notes.TXT", 1).is_ok());
        assert!(matches!(
            store.add(b"x".to_vec(), "notes.pdf", 1),
            Err(StudyError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_name_is_reduced_to_file_name() {
        let store = store_with_limit(1024);
        let doc = store.add(b"x".to_vec(), "/home/me/course/notes.txt", 1).unwrap();
        assert_eq!(doc.name, "notes.txt");
    }

    #[test]
    fn test_status_transitions_and_ready_ids() {
        let store = store_with_limit(1024);
        let doc = store.add(b"x".to_vec(), "a.txt", 1).unwrap();
        store.set_status(doc.id, DocumentStatus::Processing).unwrap();
        assert!(store.ready_ids().is_empty());

        let ready = store.mark_ready(doc.id, 3).unwrap();
        assert_eq!(ready.chunk_count, 3);
        assert!(store.ready_ids().contains(&doc.id));

        let failed = store.set_failed(doc.id, "boom").unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(store.ready_ids().is_empty());
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let store = store_with_limit(1024);
        assert!(matches!(store.remove(DocumentId(9)), Err(StudyError::NotFound(_))));
        let doc = store.add(b"x".to_vec(), "a.txt", 1).unwrap();
        store.remove(doc.id).unwrap();
        assert!(!store.contains(doc.id));
        assert!(matches!(store.get(doc.id), Err(StudyError::NotFound(_))));
    }
}
