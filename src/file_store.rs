use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported storage url: {0}")]
    UnsupportedUrl(String),
}

/// Where a stored object ended up, as seen by the rest of the system.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub url: String,
    pub size_bytes: i64,
}

/// The external object-storage collaborator. The ledger only ever records
/// consumption after one of these calls has confirmed success.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, owner: Uuid, name: &str, data: Bytes) -> Result<StoredObject, StoreError>;
    async fn delete(&self, url: &str) -> Result<(), StoreError>;
}

/// Filesystem-backed store, one directory per owning account.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, owner: Uuid, name: &str) -> PathBuf {
        // Strip any path components from the client-supplied name.
        let safe_name: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.root
            .join(owner.to_string())
            .join(format!("{}-{}", Uuid::new_v4(), safe_name))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, owner: Uuid, name: &str, data: Bytes) -> Result<StoredObject, StoreError> {
        let path = self.object_path(owner, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(StoredObject {
            url: format!("file://{}", path.display()),
            size_bytes: data.len() as i64,
        })
    }

    async fn delete(&self, url: &str) -> Result<(), StoreError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| StoreError::UnsupportedUrl(url.to_string()))?;
        fs::remove_file(Path::new(path)).await?;
        Ok(())
    }
}
