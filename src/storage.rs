use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

const MAX_KEY_ATTEMPTS: i64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
    #[error("No free storage key for {0}")]
    KeysExhausted(String),
}

/// Original uploads, stored as files under one root directory and addressed
/// by `<user>/<folder>/<timestamp>_<file name>` keys.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Key for a new upload. Path separators in the file name are replaced so
    /// a name cannot escape its folder.
    pub fn object_key(user_id: &str, folder_id: &str, timestamp_ms: i64, file_name: &str) -> String {
        let safe_name: String = file_name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{}/{}/{}_{}", user_id, folder_id, timestamp_ms, safe_name)
    }

    /// Store a new upload and return its key. An existing object is never
    /// replaced: when the key is taken the timestamp is bumped until a free
    /// one is found.
    pub fn insert(
        &self,
        user_id: &str,
        folder_id: &str,
        timestamp_ms: i64,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        for offset in 0..MAX_KEY_ATTEMPTS {
            let key = Self::object_key(user_id, folder_id, timestamp_ms + offset, file_name);
            let path = self.resolve(&key)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    tracing::debug!(key = %key, size = bytes.len(), "stored upload");
                    return Ok(key);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::KeysExhausted(file_name.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.resolve(key)?)?)
    }

    /// Remove an object. Removing a missing object is not an error.
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.resolve(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            BlobStore::object_key("local", "f1", 1700000000000, "week 1/notes.txt"),
            "local/f1/1700000000000_week 1_notes.txt"
        );
    }

    #[test]
    fn test_insert_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("blobs")).unwrap();
        let key = store.insert("local", "f1", 1, "a.txt", b"hello").unwrap();
        assert_eq!(key, "local/f1/1_a.txt");
        assert_eq!(store.get(&key).unwrap(), b"hello");

        store.remove(&key).unwrap();
        assert!(store.get(&key).is_err());
        // Second removal is a no-op.
        store.remove(&key).unwrap();
    }

    #[test]
    fn test_same_name_same_millisecond_gets_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let first = store.insert("local", "f1", 7, "notes.txt", b"first").unwrap();
        let second = store.insert("local", "f1", 7, "notes.txt", b"second").unwrap();

        assert_ne!(first, second);
        assert_eq!(second, "local/f1/8_notes.txt");
        assert_eq!(store.get(&first).unwrap(), b"first");
        assert_eq!(store.get(&second).unwrap(), b"second");
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        for key in ["../outside.txt", "/etc/passwd", "", "a/../b"] {
            assert!(
                matches!(store.get(key), Err(StorageError::InvalidPath(_))),
                "{key} should be rejected"
            );
        }
        assert!(matches!(
            store.insert("..", "f1", 1, "a.txt", b"x"),
            Err(StorageError::InvalidPath(_))
        ));
    }
}
