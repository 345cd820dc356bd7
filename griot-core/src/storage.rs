//! Durable key→blob storage for the cache's second tier.
//!
//! The [`BlobStore`] capability is a deliberately small interface so the
//! cache never knows whether it is talking to the filesystem, a device
//! keychain, or an in-memory fake. Keys are caller-normalized strings with
//! `/` as a namespace separator; [`sanitize_key_component`] makes arbitrary
//! digest text safe to embed in one.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from durable-storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("unsupported entry version: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Generic key→blob storage capability.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a blob; `None` when the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a blob, replacing any previous value.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Remove a blob. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All stored keys beginning with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Make arbitrary text safe to embed as one key component: anything that is
/// not alphanumeric becomes `_`.
pub fn sanitize_key_component(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Blob store backed by a directory tree: one `.json` file per key, with
/// `/` in keys mapped to subdirectories.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root, rejecting anything that could
    /// escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        let mut path = self.root.clone();
        let mut components = key.split('/').peekable();
        while let Some(component) = components.next() {
            if component.is_empty() || component == "." || component == ".." {
                return Err(StorageError::InvalidKey(key.to_string()));
            }
            if components.peek().is_none() {
                // Appended rather than set_extension: a dot inside the key
                // component must not be treated as an extension boundary.
                path.push(format!("{component}.json"));
            } else {
                path.push(component);
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if path.extension().map(|e| e == "json").unwrap_or(false) {
                    if let Ok(relative) = path.with_extension("").strip_prefix(&self.root) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/");
                        if key.starts_with(prefix) {
                            keys.push(key);
                        }
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
