use crate::db::Database;
use crate::llm::ModelInfo;
use crate::settings::AppSettings;
use std::collections::HashMap;
use tauri::State;

#[tauri::command]
pub fn get_settings(db: State<'_, Database>) -> Result<HashMap<String, String>, String> {
    AppSettings::masked(&db).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn set_setting(db: State<'_, Database>, key: String, value: String) -> Result<(), String> {
    AppSettings::set(&db, &key, &value).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn delete_setting(db: State<'_, Database>, key: String) -> Result<(), String> {
    AppSettings::reset(&db, &key).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_available_models(db: State<'_, Database>) -> Result<Vec<ModelInfo>, String> {
    let settings = AppSettings::load(&db).map_err(|e| e.to_string())?;
    Ok(settings.available_models())
}
