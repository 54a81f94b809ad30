// Filesystem-backed persistent tiers.
// One file per key, written atomically through a temp file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{DashError, Result};

use super::backend::{AsyncBackend, DEFAULT_SYNC_QUOTA, SyncBackend};
use super::paths::{decode_name, entry_path};

const TEXT_EXT: &str = "txt";
const JSON_EXT: &str = "json";

/// Write `text` to `path` atomically.
///
/// Each call stages into its own uniquely named file beside `path`, so
/// concurrent writers to one key never share a temp file.
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(text.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read raw text, `None` if the file does not exist.
pub fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete a file if present.
pub fn delete(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Get the modification time of a file.
pub fn modified_at(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Key files in `dir` with `extension`, least recently modified first.
fn list_keys(dir: &Path, extension: &str) -> Result<Vec<(String, u64)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut keys = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(key) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(decode_name)
        else {
            continue;
        };
        let modified = modified_at(&path).unwrap_or(SystemTime::UNIX_EPOCH);
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        keys.push((key, modified, size));
    }

    keys.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(keys.into_iter().map(|(k, _, size)| (k, size)).collect())
}

/// Synchronous tier stored as text files under a directory.
///
/// File names encode the key, so `keys()` reports keys exactly as written.
#[derive(Debug, Clone)]
pub struct FileSyncBackend {
    dir: PathBuf,
    quota: usize,
}

impl FileSyncBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_quota(dir, DEFAULT_SYNC_QUOTA)
    }

    pub fn with_quota(dir: impl Into<PathBuf>, quota: usize) -> Self {
        Self {
            dir: dir.into(),
            quota,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SyncBackend for FileSyncBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        read_text(&entry_path(&self.dir, key, TEXT_EXT))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = entry_path(&self.dir, key, TEXT_EXT);

        let used: u64 = list_keys(&self.dir, TEXT_EXT)?
            .into_iter()
            .filter(|(k, _)| k != key)
            .map(|(k, size)| k.len() as u64 + size)
            .sum();
        let used = usize::try_from(used).unwrap_or(usize::MAX);
        let needed = key.len() + value.len();

        if used.saturating_add(needed) > self.quota {
            return Err(DashError::QuotaExceeded {
                key: key.to_string(),
                needed,
                available: self.quota.saturating_sub(used),
            });
        }

        write_text(&path, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        delete(&entry_path(&self.dir, key, TEXT_EXT))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(list_keys(&self.dir, TEXT_EXT)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }
}

/// Asynchronous tier stored as JSON files under a directory.
#[derive(Debug, Clone)]
pub struct FileAsyncBackend {
    dir: PathBuf,
}

impl FileAsyncBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AsyncBackend for FileAsyncBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = entry_path(&self.dir, key, JSON_EXT);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = entry_path(&self.dir, key, JSON_EXT);
        let json = serde_json::to_string(&value)?;

        tokio::task::spawn_blocking(move || write_text(&path, &json))
            .await
            .map_err(|e| DashError::Other(e.to_string()))?
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = entry_path(&self.dir, key, JSON_EXT);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let dir = self.dir.clone();
        let keys = tokio::task::spawn_blocking(move || list_keys(&dir, JSON_EXT))
            .await
            .map_err(|e| DashError::Other(e.to_string()))??;
        Ok(keys.into_iter().map(|(k, _)| k).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_text() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("entry.txt");

        write_text(&path, "Line 1\nLine 2").unwrap();
        write_text(&path, "Line 3").unwrap();

        assert_eq!(read_text(&path).unwrap().as_deref(), Some("Line 3"));
        let files: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let text = read_text(&temp_dir.path().join("missing.txt")).unwrap();
        assert!(text.is_none());
        delete(&temp_dir.path().join("missing.txt")).unwrap();
    }

    #[test]
    fn test_file_sync_backend_round_trip_and_keys() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileSyncBackend::new(temp_dir.path());

        backend.set("devdash_a", "1").unwrap();
        backend.set("devdash_b", "2").unwrap();

        assert_eq!(backend.get("devdash_a").unwrap().as_deref(), Some("1"));
        let mut keys = backend.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["devdash_a", "devdash_b"]);

        backend.remove("devdash_a").unwrap();
        assert_eq!(backend.get("devdash_a").unwrap(), None);
    }

    #[test]
    fn test_file_sync_backend_quota() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileSyncBackend::with_quota(temp_dir.path(), 32);

        backend.set("k1", "0123456789").unwrap();
        let err = backend.set("k2", &"x".repeat(40)).unwrap_err();

        assert!(matches!(err, DashError::QuotaExceeded { .. }));
        assert_eq!(backend.get("k2").unwrap(), None);
        // Rewriting an existing key only counts the new size.
        backend.set("k1", &"y".repeat(28)).unwrap();
    }

    #[test]
    fn test_keys_with_unsafe_characters_stay_distinct() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileSyncBackend::new(temp_dir.path());

        backend.set("devdash_a.b", "dot").unwrap();
        backend.set("devdash_a_b", "underscore").unwrap();

        assert_eq!(backend.get("devdash_a.b").unwrap().as_deref(), Some("dot"));
        assert_eq!(backend.get("devdash_a_b").unwrap().as_deref(), Some("underscore"));
        let mut keys = backend.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["devdash_a.b", "devdash_a_b"]);

        backend.remove("devdash_a.b").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["devdash_a_b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_key_all_succeed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("persistent");
        let backend = std::sync::Arc::new(FileAsyncBackend::new(&dir));

        let mut writes = tokio::task::JoinSet::new();
        for i in 0..16u64 {
            let backend = std::sync::Arc::clone(&backend);
            writes.spawn(async move { backend.set("devdash_same", json!(i)).await });
        }
        while let Some(joined) = writes.join_next().await {
            joined.unwrap().unwrap();
        }

        let stored = backend.get("devdash_same").await.unwrap().unwrap();
        assert!(stored.as_u64().unwrap() < 16);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_file_async_backend_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileAsyncBackend::new(temp_dir.path().join("persistent"));

        assert_eq!(backend.get("missing").await.unwrap(), None);

        backend.set("devdash_x", json!({"stars": 5})).await.unwrap();
        assert_eq!(
            backend.get("devdash_x").await.unwrap(),
            Some(json!({"stars": 5}))
        );
        assert_eq!(backend.keys().await.unwrap(), vec!["devdash_x"]);

        backend.remove(&["devdash_x".to_string()]).await.unwrap();
        assert!(backend.keys().await.unwrap().is_empty());
    }
}
