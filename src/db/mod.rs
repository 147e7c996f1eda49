pub mod models;

use crate::embedding::{bytes_to_embedding, embedding_to_bytes};
use models::{
    Conversation, Document, Folder, GroundingMetadata, Message, NewDocument, ParseStatus, Role,
    StoreStats,
};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("Failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence seam used by the chat session. Implemented by [`Database`];
/// tests substitute stores that fail on purpose.
pub trait ConversationStore: Send + Sync {
    fn create_conversation(&self, title: &str, provider: &str) -> Result<Conversation>;

    fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sources: Option<&GroundingMetadata>,
    ) -> Result<Message>;

    /// Remember which conversation new turns are appended to, or forget it.
    fn set_current_conversation(&self, id: Option<&str>) -> Result<()>;
}

/// Settings row holding the conversation to reopen on start. Not a user
/// setting, so it is absent from `SETTING_KEYS`.
const CURRENT_CONVERSATION_KEY: &str = "current_conversation_id";

pub struct Database {
    conn: Mutex<Connection>,
}

const DOCUMENT_COLUMNS: &str = "id, folder_id, file_name, file_type, file_size, storage_path, content, parse_status, parse_error, embedding, created_at";

impl Database {
    pub fn new(app_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(app_dir)?;
        let db_path = app_dir.join("study-box.db");
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS folders (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                folder_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER,
                storage_path TEXT,
                content TEXT NOT NULL DEFAULT '',
                parse_status TEXT NOT NULL CHECK (parse_status IN ('success', 'failed', 'pending')),
                parse_error TEXT,
                embedding BLOB,
                created_at TEXT NOT NULL,
                FOREIGN KEY (folder_id) REFERENCES folders(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                provider TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                sources TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Folders ──

    pub fn create_folder(&self, name: &str) -> Result<Folder> {
        let conn = self.conn()?;
        let folder = Folder {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: crate::timestamp(),
            documents: Vec::new(),
        };
        conn.execute(
            "INSERT INTO folders (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![folder.id, folder.name, folder.created_at],
        )?;
        Ok(folder)
    }

    /// Folders in creation order, without their documents.
    pub fn list_folders(&self) -> Result<Vec<Folder>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM folders ORDER BY created_at ASC, rowid ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Folder {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
                documents: Vec::new(),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Folders in creation order, each holding its documents in upload order.
    pub fn load_folders(&self) -> Result<Vec<Folder>> {
        let mut folders = self.list_folders()?;
        for folder in &mut folders {
            folder.documents = self.list_documents(&folder.id)?;
        }
        Ok(folders)
    }

    pub fn delete_folder(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM folders WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ── Documents ──

    pub fn insert_document(&self, doc: &NewDocument) -> Result<Document> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = crate::timestamp();
        conn.execute(
            "INSERT INTO documents (id, folder_id, file_name, file_type, file_size, storage_path, content, parse_status, parse_error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                doc.folder_id,
                doc.file_name,
                doc.file_type,
                doc.file_size,
                doc.storage_path,
                doc.content,
                doc.parse_status,
                doc.parse_error,
                created_at
            ],
        )?;
        Ok(Document {
            id,
            folder_id: doc.folder_id.clone(),
            file_name: doc.file_name.clone(),
            file_type: doc.file_type.clone(),
            file_size: doc.file_size,
            storage_path: doc.storage_path.clone(),
            content: doc.content.clone(),
            parse_status: doc.parse_status,
            parse_error: doc.parse_error.clone(),
            embedding: None,
            created_at,
        })
    }

    pub fn list_documents(&self, folder_id: &str) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE folder_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![folder_id], document_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let doc = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                document_from_row,
            )
            .optional()?;
        Ok(doc)
    }

    /// Every document that carries an embedding, across all folders.
    pub fn embedded_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE embedding IS NOT NULL ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map([], document_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_document_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE documents SET embedding = ?1 WHERE id = ?2",
            params![embedding_to_bytes(embedding), id],
        )?;
        Ok(())
    }

    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ── Conversations ──

    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, provider, created_at FROM conversations ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                title: row.get(1)?,
                provider: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn()?;
        let conv = conn
            .query_row(
                "SELECT id, title, provider, created_at FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        provider: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(conv)
    }

    /// Delete a conversation and its messages. If it was the current
    /// conversation, that marker is cleared too.
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM settings WHERE key = ?1 AND value = ?2",
            params![CURRENT_CONVERSATION_KEY, id],
        )?;
        Ok(())
    }

    /// Delete every conversation and message.
    pub fn delete_all_conversations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM conversations", [])?;
        conn.execute(
            "DELETE FROM settings WHERE key = ?1",
            params![CURRENT_CONVERSATION_KEY],
        )?;
        Ok(())
    }

    pub fn current_conversation(&self) -> Result<Option<String>> {
        self.get_setting(CURRENT_CONVERSATION_KEY)
    }

    // ── Stats ──

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM folders),
                (SELECT COUNT(*) FROM documents),
                (SELECT COALESCE(SUM(file_size), 0) FROM documents),
                (SELECT COUNT(*) FROM conversations)",
            [],
            |row| {
                Ok(StoreStats {
                    folder_count: row.get(0)?,
                    document_count: row.get(1)?,
                    storage_bytes: row.get(2)?,
                    conversation_count: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }

    // ── Messages ──

    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, sources, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], message_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl ConversationStore for Database {
    fn create_conversation(&self, title: &str, provider: &str) -> Result<Conversation> {
        let conn = self.conn()?;
        let conv = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            provider: provider.to_string(),
            created_at: crate::timestamp(),
        };
        conn.execute(
            "INSERT INTO conversations (id, title, provider, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![conv.id, conv.title, conv.provider, conv.created_at],
        )?;
        Ok(conv)
    }

    fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sources: Option<&GroundingMetadata>,
    ) -> Result<Message> {
        let conn = self.conn()?;
        let msg = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            sources: sources.cloned(),
            created_at: crate::timestamp(),
        };
        let sources_json = sources
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, sources, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![msg.id, msg.conversation_id, msg.role, msg.content, sources_json, msg.created_at],
        )?;
        Ok(msg)
    }

    fn set_current_conversation(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.set_setting(CURRENT_CONVERSATION_KEY, id),
            None => self.delete_setting(CURRENT_CONVERSATION_KEY),
        }
    }
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let embedding: Option<Vec<u8>> = row.get(9)?;
    Ok(Document {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        file_name: row.get(2)?,
        file_type: row.get(3)?,
        file_size: row.get(4)?,
        storage_path: row.get(5)?,
        content: row.get(6)?,
        parse_status: row.get(7)?,
        parse_error: row.get(8)?,
        embedding: embedding.map(|bytes| bytes_to_embedding(&bytes)),
        created_at: row.get(10)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let sources: Option<String> = row.get(4)?;
    let sources = sources
        .map(|json| serde_json::from_str::<GroundingMetadata>(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        sources,
        created_at: row.get(5)?,
    })
}

impl ToSql for ParseStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ParseStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(folder_id: &str, name: &str, status: ParseStatus) -> NewDocument {
        NewDocument {
            folder_id: folder_id.to_string(),
            file_name: name.to_string(),
            file_type: "txt".into(),
            file_size: Some(5),
            storage_path: None,
            content: "hello".into(),
            parse_status: status,
            parse_error: None,
        }
    }

    #[test]
    fn test_folders_keep_creation_order() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_folder("Econ").unwrap();
        let b = db.create_folder("Policy").unwrap();
        let names: Vec<_> = db.list_folders().unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(names, vec![a.id, b.id]);
    }

    #[test]
    fn test_deleting_folder_cascades_to_documents() {
        let db = Database::open_in_memory().unwrap();
        let folder = db.create_folder("Econ").unwrap();
        let doc = db
            .insert_document(&new_doc(&folder.id, "a.txt", ParseStatus::Success))
            .unwrap();

        assert!(db.delete_folder(&folder.id).unwrap());
        assert!(db.get_document(&doc.id).unwrap().is_none());
    }

    #[test]
    fn test_load_folders_groups_documents_in_upload_order() {
        let db = Database::open_in_memory().unwrap();
        let folder = db.create_folder("Econ").unwrap();
        db.insert_document(&new_doc(&folder.id, "first.txt", ParseStatus::Success))
            .unwrap();
        db.insert_document(&new_doc(&folder.id, "second.pdf", ParseStatus::Failed))
            .unwrap();

        let folders = db.load_folders().unwrap();
        assert_eq!(folders.len(), 1);
        let names: Vec<_> = folders[0]
            .documents
            .iter()
            .map(|d| d.file_name.as_str())
            .collect();
        assert_eq!(names, vec!["first.txt", "second.pdf"]);
        assert_eq!(folders[0].documents[1].parse_status, ParseStatus::Failed);
    }

    #[test]
    fn test_embedding_is_stored_and_listed() {
        let db = Database::open_in_memory().unwrap();
        let folder = db.create_folder("Econ").unwrap();
        let doc = db
            .insert_document(&new_doc(&folder.id, "a.txt", ParseStatus::Success))
            .unwrap();
        assert!(db.embedded_documents().unwrap().is_empty());

        db.set_document_embedding(&doc.id, &[0.5, -1.0]).unwrap();
        let embedded = db.embedded_documents().unwrap();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].embedding.as_deref(), Some(&[0.5, -1.0][..]));
    }

    #[test]
    fn test_messages_round_trip_with_sources() {
        let db = Database::open_in_memory().unwrap();
        let conv = db.create_conversation("Chat", "gemini").unwrap();
        let sources = GroundingMetadata {
            chunks: vec![models::GroundingChunk {
                uri: Some("https://example.org".into()),
                title: Some("Example".into()),
            }],
            web_search_queries: vec![],
        };
        db.add_message(&conv.id, Role::User, "question", None).unwrap();
        db.add_message(&conv.id, Role::Assistant, "answer", Some(&sources))
            .unwrap();

        let messages = db.get_messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].sources.as_ref(), Some(&sources));
    }

    #[test]
    fn test_deleting_current_conversation_clears_marker() {
        let db = Database::open_in_memory().unwrap();
        let kept = db.create_conversation("Kept", "deepseek").unwrap();
        let gone = db.create_conversation("Gone", "deepseek").unwrap();

        db.set_current_conversation(Some(&kept.id)).unwrap();
        db.delete_conversation(&gone.id).unwrap();
        assert_eq!(db.current_conversation().unwrap(), Some(kept.id.clone()));

        db.delete_conversation(&kept.id).unwrap();
        assert_eq!(db.current_conversation().unwrap(), None);
        assert!(db.get_conversation(&kept.id).unwrap().is_none());
    }

    #[test]
    fn test_stats_count_documents_and_bytes() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.stats().unwrap(), StoreStats::default());

        let folder = db.create_folder("Econ").unwrap();
        db.insert_document(&new_doc(&folder.id, "a.txt", ParseStatus::Success))
            .unwrap();
        let mut unsized_doc = new_doc(&folder.id, "b.txt", ParseStatus::Failed);
        unsized_doc.file_size = None;
        db.insert_document(&unsized_doc).unwrap();
        let conv = db.create_conversation("Chat", "gemini").unwrap();
        db.add_message(&conv.id, Role::User, "q", None).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.folder_count, 1);
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.storage_bytes, 5);
        assert_eq!(stats.conversation_count, 1);

        db.set_current_conversation(Some(&conv.id)).unwrap();
        db.delete_all_conversations().unwrap();
        assert!(db.get_messages(&conv.id).unwrap().is_empty());
        assert_eq!(db.current_conversation().unwrap(), None);
    }

    #[test]
    fn test_settings_upsert_and_delete() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("theme").unwrap(), None);
        db.set_setting("theme", "dark").unwrap();
        db.set_setting("theme", "light").unwrap();
        assert_eq!(db.get_setting("theme").unwrap().as_deref(), Some("light"));
        db.delete_setting("theme").unwrap();
        assert_eq!(db.get_setting("theme").unwrap(), None);
    }
}
