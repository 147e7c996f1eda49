use crate::db::models::{Document, Folder, NewDocument, ParseStatus};
use crate::db::{Database, StoreError};
use crate::doc_processor::{self, ParsedDocument};
use crate::embedding::{embed_text, search_similar};
use crate::llm::LlmError;
use crate::settings::AppSettings;
use crate::storage::{BlobStore, StorageError};
use serde::Serialize;
use std::path::Path;

pub const DEFAULT_TOP_K: usize = 5;
pub const MATCH_THRESHOLD: f32 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] LlmError),
    #[error("Folder name must not be empty")]
    EmptyFolderName,
    #[error("Folder not found: {0}")]
    FolderNotFound(String),
    #[error("An OpenAI API key is required for knowledge base search")]
    EmbeddingUnavailable,
}

impl Serialize for KnowledgeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// One file picked for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self {
            file_name,
            bytes: std::fs::read(path)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadFailure {
    pub file_name: String,
    pub error: String,
}

/// Outcome of a batch upload. Files that could not be parsed still appear in
/// `documents` with a failed status; `failures` lists files that could not be
/// stored at all.
#[derive(Debug, Default, Serialize)]
pub struct UploadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<UploadFailure>,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

pub fn create_folder(db: &Database, name: &str) -> Result<Folder, KnowledgeError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(KnowledgeError::EmptyFolderName);
    }
    Ok(db.create_folder(name)?)
}

/// Folders with their documents, in the order the context collector walks them.
pub fn load_folders(db: &Database) -> Result<Vec<Folder>, KnowledgeError> {
    Ok(db.load_folders()?)
}

/// Delete a folder, its documents and their stored uploads.
pub fn delete_folder(db: &Database, blobs: &BlobStore, folder_id: &str) -> Result<bool, KnowledgeError> {
    for doc in db.list_documents(folder_id)? {
        remove_blob(blobs, &doc);
    }
    Ok(db.delete_folder(folder_id)?)
}

pub fn delete_document(db: &Database, blobs: &BlobStore, id: &str) -> Result<bool, KnowledgeError> {
    match db.get_document(id)? {
        Some(doc) => {
            remove_blob(blobs, &doc);
            Ok(db.delete_document(id)?)
        }
        None => Ok(false),
    }
}

/// Remove every folder, document, stored upload and conversation. Settings
/// are kept.
pub fn clear_all(db: &Database, blobs: &BlobStore) -> Result<(), KnowledgeError> {
    let folders = db.list_folders()?;
    for folder in &folders {
        delete_folder(db, blobs, &folder.id)?;
    }
    db.delete_all_conversations()?;
    tracing::info!(folders = folders.len(), "cleared all data");
    Ok(())
}

fn remove_blob(blobs: &BlobStore, doc: &Document) {
    if let Some(key) = &doc.storage_path {
        if let Err(e) = blobs.remove(key) {
            tracing::warn!(document = %doc.id, error = %e, "failed to remove stored upload");
        }
    }
}

/// Store, parse and record `files` one after another, in order.
///
/// A file that cannot be parsed is recorded with a failed status and the
/// parse error; a file that cannot be stored is reported in
/// [`UploadReport::failures`]. Neither stops the rest of the batch. When an
/// OpenAI key is configured, successfully parsed documents are embedded;
/// embedding failures are logged and leave the document without a vector.
pub async fn upload_batch(
    db: &Database,
    blobs: &BlobStore,
    settings: &AppSettings,
    folder_id: &str,
    files: Vec<UploadFile>,
) -> Result<UploadReport, KnowledgeError> {
    if !db.list_folders()?.iter().any(|f| f.id == folder_id) {
        return Err(KnowledgeError::FolderNotFound(folder_id.to_string()));
    }

    let embedder = settings.embedding_config();
    let mut report = UploadReport::default();

    for file in files {
        let key = match blobs.insert(
            &settings.user_id,
            folder_id,
            chrono::Utc::now().timestamp_millis(),
            &file.file_name,
            &file.bytes,
        ) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "failed to store upload");
                report.failures.push(UploadFailure {
                    file_name: file.file_name,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let new_doc = match doc_processor::parse_bytes(&file.file_name, &file.bytes) {
            Ok(ParsedDocument { content, file_type }) => NewDocument {
                folder_id: folder_id.to_string(),
                file_name: file.file_name.clone(),
                file_type,
                file_size: Some(file.bytes.len() as i64),
                storage_path: Some(key.clone()),
                content,
                parse_status: ParseStatus::Success,
                parse_error: None,
            },
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "failed to parse upload");
                NewDocument {
                    folder_id: folder_id.to_string(),
                    file_name: file.file_name.clone(),
                    file_type: doc_processor::file_type_of(&file.file_name),
                    file_size: Some(file.bytes.len() as i64),
                    storage_path: Some(key.clone()),
                    content: String::new(),
                    parse_status: ParseStatus::Failed,
                    parse_error: Some(e.to_string()),
                }
            }
        };

        let mut doc = match db.insert_document(&new_doc) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "failed to record upload");
                if let Err(e) = blobs.remove(&key) {
                    tracing::warn!(key = %key, error = %e, "failed to clean up stored upload");
                }
                report.failures.push(UploadFailure {
                    file_name: file.file_name,
                    error: e.to_string(),
                });
                continue;
            }
        };

        if let Some(config) = embedder.as_ref().filter(|_| doc.is_usable()) {
            match embed_text(config, &doc.content).await {
                Ok(embedding) => match db.set_document_embedding(&doc.id, &embedding) {
                    Ok(()) => doc.embedding = Some(embedding),
                    Err(e) => tracing::warn!(document = %doc.id, error = %e, "failed to save embedding"),
                },
                Err(e) => {
                    tracing::warn!(document = %doc.id, error = %e, "embedding generation failed (non-fatal)");
                }
            }
        }

        tracing::info!(file = %doc.file_name, status = doc.parse_status.as_str(), "upload recorded");
        report.documents.push(doc);
    }

    Ok(report)
}

/// Documents whose similarity to `query` reaches `threshold`, best first.
/// Only documents that were embedded at upload time take part.
pub async fn search(
    db: &Database,
    settings: &AppSettings,
    query: &str,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<SearchHit>, KnowledgeError> {
    let config = settings
        .embedding_config()
        .ok_or(KnowledgeError::EmbeddingUnavailable)?;
    let documents = db.embedded_documents()?;
    if documents.is_empty() {
        return Ok(Vec::new());
    }

    let query_embedding = embed_text(&config, query).await?;
    let candidates: Vec<(String, Vec<f32>)> = documents
        .iter()
        .filter_map(|d| d.embedding.clone().map(|e| (d.id.clone(), e)))
        .collect();

    let ranked = search_similar(&query_embedding, &candidates, top_k, threshold);
    let hits = ranked
        .into_iter()
        .filter_map(|(id, score)| {
            documents
                .iter()
                .find(|d| d.id == id)
                .map(|d| SearchHit {
                    document: d.clone(),
                    score,
                })
        })
        .collect();
    Ok(hits)
}
