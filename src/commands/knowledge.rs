use crate::db::models::{Folder, StoreStats};
use crate::db::Database;
use crate::knowledge::{self, SearchHit, UploadFailure, UploadFile, UploadReport};
use crate::session::ChatSession;
use crate::settings::AppSettings;
use crate::storage::BlobStore;
use std::path::Path;
use std::sync::Mutex;
use tauri::State;

#[tauri::command]
pub fn create_folder(db: State<'_, Database>, name: String) -> Result<Folder, String> {
    knowledge::create_folder(&db, &name).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn list_folders(db: State<'_, Database>) -> Result<Vec<Folder>, String> {
    knowledge::load_folders(&db).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn delete_folder(
    db: State<'_, Database>,
    blobs: State<'_, BlobStore>,
    id: String,
) -> Result<bool, String> {
    knowledge::delete_folder(&db, &blobs, &id).map_err(|e| e.to_string())
}

/// Upload files picked in the dialog, in the order they were picked.
#[tauri::command]
pub async fn upload_documents(
    db: State<'_, Database>,
    blobs: State<'_, BlobStore>,
    folder_id: String,
    file_paths: Vec<String>,
) -> Result<UploadReport, String> {
    let settings = AppSettings::load(&db).map_err(|e| e.to_string())?;

    let mut files = Vec::with_capacity(file_paths.len());
    let mut unreadable = Vec::new();
    for file_path in &file_paths {
        match UploadFile::read(Path::new(file_path)) {
            Ok(file) => files.push(file),
            Err(e) => {
                tracing::warn!(path = %file_path, error = %e, "failed to read picked file");
                unreadable.push(UploadFailure {
                    file_name: file_path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let mut report = knowledge::upload_batch(&db, &blobs, &settings, &folder_id, files)
        .await
        .map_err(|e| e.to_string())?;
    report.failures.extend(unreadable);
    Ok(report)
}

#[tauri::command]
pub fn delete_document(
    db: State<'_, Database>,
    blobs: State<'_, BlobStore>,
    id: String,
) -> Result<bool, String> {
    knowledge::delete_document(&db, &blobs, &id).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn search_knowledge_base(
    db: State<'_, Database>,
    query: String,
    top_k: Option<usize>,
) -> Result<Vec<SearchHit>, String> {
    let settings = AppSettings::load(&db).map_err(|e| e.to_string())?;
    knowledge::search(
        &db,
        &settings,
        &query,
        top_k.unwrap_or(knowledge::DEFAULT_TOP_K),
        knowledge::MATCH_THRESHOLD,
    )
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_stats(db: State<'_, Database>) -> Result<StoreStats, String> {
    db.stats().map_err(|e| e.to_string())
}

/// Wipe folders, uploads and chat history, and empty the open chat.
#[tauri::command]
pub fn clear_all_data(
    db: State<'_, Database>,
    blobs: State<'_, BlobStore>,
    session: State<'_, Mutex<ChatSession>>,
) -> Result<(), String> {
    knowledge::clear_all(&db, &blobs).map_err(|e| e.to_string())?;
    let mut s = session.lock().map_err(|e| e.to_string())?;
    s.reset();
    Ok(())
}
