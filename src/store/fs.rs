//! Filesystem-backed asset store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use super::{new_asset_name, validate_asset_name, AssetStore};
use crate::error::StoreError;

/// Stores base assets as flat files under a single directory.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    /// Store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `root`, creating the directory now.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(root);
        tokio::fs::create_dir_all(&store.root).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_asset_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn persist_asset(&self, data: Bytes) -> Result<String, StoreError> {
        let name = new_asset_name();
        let path = self.path_for(&name)?;
        write_atomic(&path, &data).await?;
        debug!(name = %name, size = data.len(), "Persisted asset");
        Ok(name)
    }

    async fn read_asset(&self, name: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_asset(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `data` to `path` through a hidden temporary file and an atomic
/// rename, so readers never observe a partial file.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io(format!("no parent directory for {}", path.display())))?;
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::Io(format!("invalid file name: {}", path.display())))?;
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
