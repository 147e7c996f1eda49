pub mod context;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod knowledge;
pub mod llm;
pub mod session;
pub mod settings;
pub mod storage;

#[cfg(feature = "desktop")]
mod commands;

/// Current time as an RFC 3339 string with millisecond precision. Used for
/// every `created_at` column so rows sort lexically in creation order.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` filter. Calling this more than once is harmless.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use db::Database;
    use session::ChatSession;
    use std::sync::Mutex;
    use storage::BlobStore;
    use tauri::Manager;

    init_tracing();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let app_dir = app.path().app_data_dir()?;
            let database = Database::new(&app_dir)?;
            let blobs = BlobStore::new(app_dir.join("uploads"))?;
            tracing::info!(dir = %app_dir.display(), "data directory ready");
            let session = ChatSession::restore(&database).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to restore last conversation");
                ChatSession::new()
            });
            app.manage(database);
            app.manage(blobs);
            app.manage(Mutex::new(session));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::knowledge::create_folder,
            commands::knowledge::list_folders,
            commands::knowledge::delete_folder,
            commands::knowledge::upload_documents,
            commands::knowledge::delete_document,
            commands::knowledge::search_knowledge_base,
            commands::knowledge::get_stats,
            commands::knowledge::clear_all_data,
            commands::chat::send_message,
            commands::chat::get_transcript,
            commands::chat::new_chat,
            commands::chat::list_conversations,
            commands::chat::get_messages,
            commands::chat::open_conversation,
            commands::chat::delete_conversation,
            commands::settings::get_settings,
            commands::settings::set_setting,
            commands::settings::delete_setting,
            commands::settings::get_available_models,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
