use crate::db::models::{Conversation, Message};
use crate::db::{ConversationStore, Database};
use crate::knowledge;
use crate::session::{self, ChatSession, TranscriptEntry};
use crate::settings::AppSettings;
use std::sync::Mutex;
use tauri::State;

fn transcript(session: &Mutex<ChatSession>) -> Vec<TranscriptEntry> {
    session
        .lock()
        .map(|s| s.entries().to_vec())
        .unwrap_or_else(|poisoned| poisoned.into_inner().entries().to_vec())
}

#[tauri::command]
pub async fn send_message(
    db: State<'_, Database>,
    session: State<'_, Mutex<ChatSession>>,
    content: String,
) -> Result<TranscriptEntry, String> {
    let settings = AppSettings::load(&db).map_err(|e| e.to_string())?;
    let folders = knowledge::load_folders(&db).map_err(|e| e.to_string())?;

    session::send_message(
        session.inner(),
        &content,
        &folders,
        &settings,
        Some(db.inner()),
    )
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_transcript(session: State<'_, Mutex<ChatSession>>) -> Vec<TranscriptEntry> {
    transcript(session.inner())
}

#[tauri::command]
pub fn new_chat(
    db: State<'_, Database>,
    session: State<'_, Mutex<ChatSession>>,
) -> Result<(), String> {
    db.set_current_conversation(None)
        .map_err(|e| e.to_string())?;
    let mut s = session.lock().map_err(|e| e.to_string())?;
    s.reset();
    Ok(())
}

#[tauri::command]
pub fn list_conversations(db: State<'_, Database>) -> Result<Vec<Conversation>, String> {
    db.list_conversations().map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_messages(
    db: State<'_, Database>,
    conversation_id: String,
) -> Result<Vec<Message>, String> {
    db.get_messages(&conversation_id)
        .map_err(|e| e.to_string())
}

/// Load a stored conversation into the chat session.
#[tauri::command]
pub fn open_conversation(
    db: State<'_, Database>,
    session: State<'_, Mutex<ChatSession>>,
    id: String,
) -> Result<Vec<TranscriptEntry>, String> {
    let messages = db.get_messages(&id).map_err(|e| e.to_string())?;
    db.set_current_conversation(Some(&id))
        .map_err(|e| e.to_string())?;
    let mut s = session.lock().map_err(|e| e.to_string())?;
    s.resume(&id, messages);
    Ok(s.entries().to_vec())
}

#[tauri::command]
pub fn delete_conversation(
    db: State<'_, Database>,
    session: State<'_, Mutex<ChatSession>>,
    id: String,
) -> Result<(), String> {
    db.delete_conversation(&id).map_err(|e| e.to_string())?;
    let mut s = session.lock().map_err(|e| e.to_string())?;
    if s.conversation_id() == Some(id.as_str()) {
        s.reset();
    }
    Ok(())
}
