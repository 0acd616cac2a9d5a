//! Blob store abstraction for raw document bytes.
//!
//! The keyspace is flat: `documents/{document_id}/{filename}`. URLs handed
//! back by `put` are opaque to callers; only the blob store interprets them.
//!
//! Backends:
//! - `FsBlobStore` - local filesystem (default, local-first)
//! - `InMemoryBlobStore` - testing

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::types::{AppError, Result};

const BLOB_SCHEME: &str = "blob://";

/// Result of storing a blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Opaque URL to retrieve the bytes later.
    pub url: String,
    /// Stored size in bytes.
    pub size: u64,
}

/// Object storage capability.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key` and return an opaque URL.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredBlob>;

    /// Fetch the bytes behind a URL produced by `put`.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// Remove the blob behind a URL. Idempotent.
    async fn delete_by_url(&self, url: &str) -> Result<()>;
}

fn blob_err(e: impl std::fmt::Display) -> AppError {
    AppError::AdapterUnavailable {
        adapter: "blob",
        message: e.to_string(),
        refund_txn_id: None,
    }
}

fn key_from_url(url: &str) -> Result<&str> {
    url.strip_prefix(BLOB_SCHEME)
        .ok_or_else(|| AppError::InvalidInput(format!("not a blob URL: {}", url)))
}

/// Reject keys that escape the store root.
fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let clean = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if key.is_empty() || !clean {
        return Err(AppError::InvalidInput(format!("invalid blob key: {}", key)));
    }
    Ok(())
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Blob store on the local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(blob_err)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<StoredBlob> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(blob_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(blob_err)?;
        Ok(StoredBlob {
            url: format!("{}{}", BLOB_SCHEME, key),
            size: bytes.len() as u64,
        })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key_from_url(url)?)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("blob {}", url)))
            }
            Err(e) => Err(blob_err(e)),
        }
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        let path = self.path_for(key_from_url(url)?)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(blob_err(e)),
        }
    }
}

// ============================================================================
// In-memory store (testing)
// ============================================================================

/// Blob store held entirely in memory; contents die with the process.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<StoredBlob> {
        validate_key(key)?;
        let url = format!("{}{}", BLOB_SCHEME, key);
        self.blobs.write().insert(url.clone(), bytes.to_vec());
        Ok(StoredBlob {
            url,
            size: bytes.len() as u64,
        })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("blob {}", url)))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        self.blobs.write().remove(url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let stored = store
            .put("documents/abc/kanun.pdf", b"pdf bytes", "application/pdf")
            .await
            .unwrap();
        assert_eq!(stored.size, 9);

        let bytes = store.get(&stored.url).await.unwrap();
        assert_eq!(bytes, b"pdf bytes");

        store.delete_by_url(&stored.url).await.unwrap();
        assert!(matches!(
            store.get(&stored.url).await,
            Err(AppError::NotFound(_))
        ));
        // Deleting again stays Ok.
        store.delete_by_url(&stored.url).await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let result = store.put("../escape.pdf", b"x", "application/pdf").await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryBlobStore::new();
        let stored = store
            .put("documents/x/y.pdf", b"data", "application/pdf")
            .await
            .unwrap();
        assert_eq!(store.get(&stored.url).await.unwrap(), b"data");
        store.delete_by_url(&stored.url).await.unwrap();
        assert!(store.get(&stored.url).await.is_err());
    }
}
