use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("upload failed: {0}")]
    Upload(String),
}

/// Binary object storage addressed by opaque paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError>;

    /// Time-limited URL for reading back an uploaded object.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, BlobError>;
}

/// File extension for an uploaded image, defaulting to `jpg`.
pub fn extension_for(content_type: &str) -> &'static str {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("png") {
        "png"
    } else if content_type.contains("webp") {
        "webp"
    } else {
        "jpg"
    }
}

fn checked(path: &str) -> Result<&Path, BlobError> {
    let candidate = Path::new(path);
    let safe = !path.is_empty()
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if safe {
        Ok(candidate)
    } else {
        Err(BlobError::InvalidPath(path.to_string()))
    }
}

fn expiry(ttl: Duration) -> i64 {
    Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2)
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<StoredBlob> {
        self.objects.get(path).map(|entry| entry.value().clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        checked(path)?;
        self.objects.insert(
            path.to_string(),
            StoredBlob {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, BlobError> {
        if !self.objects.contains_key(path) {
            return Err(BlobError::NotFound(path.to_string()));
        }
        Ok(format!("memory://{path}?expires={}", expiry(ttl)))
    }
}

/// Stores objects as files under `root`; URLs are issued against
/// `public_base_url`, which is expected to serve `root`.
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), BlobError> {
        let target = self.root.join(checked(path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| BlobError::Upload(format!("{}: {err}", parent.display())))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|err| BlobError::Upload(format!("{}: {err}", target.display())))
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, BlobError> {
        let target = self.root.join(checked(path)?);
        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(BlobError::NotFound(path.to_string()));
        }
        Ok(format!(
            "{}/{path}?expires={}",
            self.public_base_url,
            expiry(ttl)
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{extension_for, BlobStore, FsBlobStore, MemoryBlobStore};

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/WEBP"), "webp");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/octet-stream"), "jpg");
    }

    #[tokio::test]
    async fn rejects_paths_escaping_the_store() {
        let store = MemoryBlobStore::new();
        assert!(store.upload("../etc/passwd", vec![1], "image/png").await.is_err());
        assert!(store.upload("/abs/path.png", vec![1], "image/png").await.is_err());
        assert!(store.upload("org/a/b.png", vec![1], "image/png").await.is_ok());
    }

    #[tokio::test]
    async fn fs_store_writes_nested_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://localhost:3000/blobs/");

        store
            .upload("org/o1/shipments/s1/intake/1-0.jpg", vec![0xFF, 0xD8], "image/jpeg")
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("org/o1/shipments/s1/intake/1-0.jpg")).unwrap();
        assert_eq!(written, vec![0xFF, 0xD8]);

        let url = store
            .signed_url("org/o1/shipments/s1/intake/1-0.jpg", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:3000/blobs/org/o1/shipments/s1/intake/1-0.jpg?expires="));
    }
}
