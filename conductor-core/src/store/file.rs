//! Directory-backed KeyValueStore
//!
//! Each key maps to a file under the root directory (`resume/<id>` becomes
//! `<root>/resume/<id>`). Writes go to a temporary sibling first and are
//! renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::traits::{KeyValueStore, validate_key};
use crate::error::StoreError;

const TMP_SUFFIX: &str = ".tmp";

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the platform data directory (`~/.local/share/conductor/store`)
    pub fn default_location() -> Self {
        Self::new(conductor_paths::store_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(format!(".{}{TMP_SUFFIX}", Uuid::new_v4()));
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, value).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the directory named by `prefix` up to its last `/`; nested
    /// directories below it are not descended into.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir_part = prefix.rfind('/').map_or("", |i| &prefix[..i]);
        let dir = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let key = if dir_part.is_empty() {
                name
            } else {
                format!("{dir_part}/{name}")
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_creates_nested_directories() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.put("resume/agent-1", b"{}".to_vec()).await.unwrap();

        assert!(dir.path().join("resume").join("agent-1").exists());
        assert_eq!(
            store.get("resume/agent-1").await.unwrap(),
            Some(b"{}".to_vec())
        );
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.get("nothing/here").await.unwrap(), None);
        store.delete("nothing/here").await.unwrap();
    }

    #[tokio::test]
    async fn put_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.put("snapshot/latest", b"one".to_vec()).await.unwrap();
        store.put("snapshot/latest", b"two".to_vec()).await.unwrap();

        assert_eq!(
            store.get("snapshot/latest").await.unwrap(),
            Some(b"two".to_vec())
        );
        let names: Vec<_> = std::fs::read_dir(dir.path().join("snapshot"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn keys_lists_one_namespace() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.put("resume/b", vec![]).await.unwrap();
        store.put("resume/a", vec![]).await.unwrap();
        store.put("queue/x", vec![]).await.unwrap();

        assert_eq!(
            store.keys("resume/").await.unwrap(),
            vec!["resume/a".to_string(), "resume/b".to_string()]
        );
        assert!(store.keys("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        FileStore::new(dir.path())
            .put("queue/run", b"[1]".to_vec())
            .await
            .unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.get("queue/run").await.unwrap(), Some(b"[1]".to_vec()));
    }
}
