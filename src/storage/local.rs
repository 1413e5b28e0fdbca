//! Directory-backed object storage
//!
//! Each bucket is a directory under the store root and each key a file path
//! below it. Writes go to a file under `<root>/.incoming` first and are
//! renamed into place, so a reader never observes a half-written object.

use super::{ObjectLocation, ObjectStore};
use crate::error::PipelineError;
use async_trait::async_trait;
use eyre::Result;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-flight writes; never a bucket since bucket names cannot start with `.`
const INCOMING_DIR: &str = ".incoming";

static NEXT_WRITE: AtomicU64 = AtomicU64::new(0);

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| PipelineError::storage(root.display(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an object
    ///
    /// Keys may contain `/` separators but never `..` or absolute components.
    pub fn path_of(&self, location: &ObjectLocation) -> Result<PathBuf> {
        let key = Path::new(&location.key);
        if !is_normal(key) {
            return Err(PipelineError::storage(location, "invalid key").into());
        }
        Ok(self.bucket_dir(&location.bucket)?.join(key))
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.starts_with('.') || bucket.contains('/') || !is_normal(Path::new(bucket)) {
            return Err(PipelineError::storage(bucket, "invalid bucket name").into());
        }
        Ok(self.root.join(bucket))
    }

    fn incoming_path(&self) -> PathBuf {
        let n = NEXT_WRITE.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(INCOMING_DIR)
            .join(format!("{}-{}", std::process::id(), n))
    }
}

fn is_normal(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn not_found(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::NotFound
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<()> {
        let path = self.path_of(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::storage(location, e))?;
        }

        let tmp = self.incoming_path();
        if let Some(parent) = tmp.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::storage(location, e))?;
        }
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| PipelineError::storage(location, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(PipelineError::storage(location, e).into());
        }

        log::trace!("Wrote {}", path.display());
        Ok(())
    }

    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>> {
        let path = self.path_of(location)?;
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::storage(location, e))?;
        Ok(body)
    }

    async fn exists(&self, location: &ObjectLocation) -> Result<bool> {
        let path = self.path_of(location)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if not_found(&e) => Ok(false),
            Err(e) => Err(PipelineError::storage(location, e).into()),
        }
    }

    async fn copy(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<()> {
        let body = self.get(from).await?;
        self.put(to, body).await
    }

    async fn delete(&self, location: &ObjectLocation) -> Result<()> {
        let path = self.path_of(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if not_found(&e) => Ok(()),
            Err(e) => Err(PipelineError::storage(location, e).into()),
        }
    }

    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        let dir = self.bucket_dir(bucket)?;

        let mut keys = Vec::new();
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if not_found(&e) && current == dir => return Ok(Vec::new()),
                Err(e) => return Err(PipelineError::storage(bucket, e).into()),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| PipelineError::storage(bucket, e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| PipelineError::storage(bucket, e))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&dir) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        format!("local store at {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, kind_of};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_exists() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path()).unwrap();
        let location = ObjectLocation::new("raw", "response_data_01082023101500.json");

        assert!(!store.exists(&location).await.unwrap());
        store.put(&location, b"{\"results\":[]}".to_vec()).await.unwrap();
        assert!(store.exists(&location).await.unwrap());
        assert_eq!(store.get(&location).await.unwrap(), b"{\"results\":[]}");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path()).unwrap();
        let location = ObjectLocation::new("raw", "a.json");

        store.put(&location, b"first".to_vec()).await.unwrap();
        store.put(&location, b"second".to_vec()).await.unwrap();
        assert_eq!(store.get(&location).await.unwrap(), b"second");
        assert_eq!(store.list("raw").await.unwrap(), vec!["a.json"]);
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path()).unwrap();
        let source = ObjectLocation::new("raw", "nested/a.json");
        let target = source.in_bucket("archive");

        store.put(&source, vec![0, 159, 146, 150]).await.unwrap();
        store.copy(&source, &target).await.unwrap();
        assert_eq!(store.get(&target).await.unwrap(), vec![0, 159, 146, 150]);
        assert_eq!(store.list("archive").await.unwrap(), vec!["nested/a.json"]);

        store.delete(&source).await.unwrap();
        assert!(!store.exists(&source).await.unwrap());
        // Deleting twice is fine
        store.delete(&source).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path()).unwrap();

        let err = store.get(&ObjectLocation::new("raw", "missing.json")).await.unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Storage));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path()).unwrap();

        assert!(store.path_of(&ObjectLocation::new("raw", "../etc/passwd")).is_err());
        assert!(store.path_of(&ObjectLocation::new("raw", "/abs")).is_err());
        assert!(store.path_of(&ObjectLocation::new("", "a.json")).is_err());
        assert!(store.path_of(&ObjectLocation::new(".incoming", "a.json")).is_err());
        assert!(store.list(".incoming").await.is_err());
    }

    #[tokio::test]
    async fn test_part_suffix_is_an_ordinary_key() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path()).unwrap();
        let location = ObjectLocation::new("raw", "upload.part");

        store.put(&location, b"chunk".to_vec()).await.unwrap();
        assert!(store.exists(&location).await.unwrap());
        assert_eq!(store.list("raw").await.unwrap(), vec!["upload.part"]);
        assert!(
            std::fs::read_dir(temp.path().join(".incoming"))
                .unwrap()
                .next()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_list_missing_bucket() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path()).unwrap();
        assert!(store.list("nothing").await.unwrap().is_empty());
    }
}
