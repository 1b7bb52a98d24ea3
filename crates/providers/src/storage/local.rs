//! Local-directory object store for development.
//!
//! Objects live under a root directory mirroring their keys. Presigned
//! uploads have no meaning without an external endpoint, so `presign_put`
//! returns a `local://` URL the gateway recognizes as "accept the bytes
//! directly".

use std::path::{Path, PathBuf};
use std::time::Duration;

use es_domain::config::StorageProviderConfig;
use es_domain::error::{Error, Result};

use crate::traits::ObjectStore;

pub struct LocalStore {
    name: String,
    root: PathBuf,
}

impl LocalStore {
    pub fn from_config(cfg: &StorageProviderConfig) -> Result<Self> {
        let root = cfg
            .root
            .clone()
            .ok_or_else(|| Error::Config(format!("storage {}: root required", cfg.name)))?;
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            name: cfg.name.clone(),
            root: PathBuf::from(root),
        })
    }

    #[cfg(test)]
    fn at(root: &Path) -> Self {
        Self {
            name: "local".into(),
            root: root.to_path_buf(),
        }
    }

    /// Reject keys that could escape the root directory.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(Error::InvalidParam(format!("bad object key '{key}'")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn object_url(&self, key: &str, _ttl: Duration) -> Result<String> {
        let path = self.path_for(key)?;
        Ok(format!("file://{}", path.display()))
    }

    async fn presign_put(&self, key: &str, _ttl: Duration, _content_type: &str) -> Result<String> {
        self.path_for(key)?;
        Ok(format!("local://{key}"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_exists_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::at(dir.path());

        let key = "uploads/2026/03/abc.wav";
        assert!(!store.exists(key).await.unwrap());
        store
            .put_object(key, b"RIFF....".to_vec(), "audio/wav")
            .await
            .unwrap();
        assert!(store.exists(key).await.unwrap());

        let url = store.object_url(key, Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(key));

        store.delete(key).await.unwrap();
        assert!(!store.exists(key).await.unwrap());
        // Deleting again is a no-op.
        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::at(dir.path());
        let err = store.exists("../../etc/passwd").await.unwrap_err();
        assert_eq!(err.code(), 40000);
    }
}
