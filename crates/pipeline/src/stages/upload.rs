//! Upload stage: content-addressed storage of the canonical audio file.
//!
//! The object key embeds the SHA-256 of the content, so re-uploading the
//! same bytes is a no-op ("instant upload") and the key doubles as the
//! dedup handle.

use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use es_domain::error::Result;
use es_providers::traits::ObjectStore;

/// SHA-256 of a file, streamed in 64 KiB chunks.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `uploads/{yyyy}/{mm}/{sha256}.{ext}`.
pub fn object_key(hash: &str, ext: &str) -> String {
    let now = Utc::now();
    format!("uploads/{:04}/{:02}/{hash}.{ext}", now.year(), now.month())
}

/// Upload the canonical file; skips the put when an object with the same
/// content hash already exists. Returns `(key, hash, uploaded)`.
pub async fn upload_canonical(
    store: Arc<dyn ObjectStore>,
    path: &Path,
    content_type: &str,
) -> Result<(String, String, bool)> {
    let hash = hash_file(path).await?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("wav");
    let key = object_key(&hash, ext);

    if store.exists(&key).await? {
        tracing::debug!(key = %key, "object already stored, skipping upload");
        return Ok((key, hash, false));
    }

    let bytes = tokio::fs::read(path).await?;
    store.put_object(&key, bytes, content_type).await?;
    Ok((key, hash, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        puts: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl ObjectStore for MemStore {
        async fn put_object(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
            *self.puts.lock() += 1;
            self.objects.lock().insert(key.to_string(), bytes);
            Ok(())
        }

        async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
            self.objects
                .lock()
                .get(key)
                .cloned()
                .ok_or_else(|| es_domain::Error::NotFound(format!("object {key}")))
        }

        async fn object_url(&self, key: &str, _ttl: Duration) -> Result<String> {
            Ok(format!("mem://{key}"))
        }

        async fn presign_put(&self, key: &str, _ttl: Duration, _ct: &str) -> Result<String> {
            Ok(format!("mem://put/{key}"))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.objects.lock().remove(key);
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.objects.lock().contains_key(key))
        }

        fn provider_name(&self) -> &str {
            "mem"
        }
    }

    #[test]
    fn object_key_shape() {
        let key = object_key("deadbeef", "wav");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts[0], "uploads");
        assert_eq!(parts.len(), 4);
        assert!(parts[3].ends_with(".wav"));
        assert!(parts[3].starts_with("deadbeef"));
    }

    #[tokio::test]
    async fn hash_is_stable_and_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        tokio::fs::write(&path, b"RIFF-fake-audio").await.unwrap();

        let h1 = hash_file(&path).await.unwrap();
        let h2 = hash_file(&path).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[tokio::test]
    async fn repeat_upload_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        tokio::fs::write(&path, b"RIFF-fake-audio").await.unwrap();

        let store = Arc::new(MemStore::default());
        let (key1, hash1, uploaded1) =
            upload_canonical(store.clone(), &path, "audio/wav").await.unwrap();
        let (key2, hash2, uploaded2) =
            upload_canonical(store.clone(), &path, "audio/wav").await.unwrap();

        assert_eq!(key1, key2);
        assert_eq!(hash1, hash2);
        assert!(uploaded1);
        assert!(!uploaded2);
        assert_eq!(*store.puts.lock(), 1);
    }
}
