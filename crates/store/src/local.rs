//! Media storage in a local directory.
//!
//! Objects are written under `root` with content-addressed names and
//! referenced as `{base_url}/{name}`. Something else (a static file
//! server, a synced bucket) is expected to serve `root` at `base_url`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use genbatch_core::hashing::content_name;
use genbatch_core::store::{MediaStore, StorageError};

use crate::fetch::HttpFetcher;

pub struct LocalMediaStore {
    root: PathBuf,
    base_url: String,
    fetcher: HttpFetcher,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self, StorageError> {
        Ok(Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fetcher: HttpFetcher::new()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url)
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn store(&self, bytes: Vec<u8>, suggested_name: &str) -> Result<String, StorageError> {
        let name = content_name(&bytes, suggested_name);
        let path = self.root.join(&name);

        // Same name means same bytes.
        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(name, "Object already stored");
            return Ok(self.url_for(&name));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        // Each writer gets its own partial file; concurrent stores of the
        // same bytes race only on the final rename.
        let partial = self.root.join(format!(".{name}.{}.partial", uuid::Uuid::now_v7()));
        if let Err(e) = tokio::fs::write(&partial, &bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            if !tokio::fs::try_exists(&path).await? {
                return Err(e.into());
            }
            tracing::debug!(name, "Object stored by a concurrent writer");
            return Ok(self.url_for(&name));
        }

        tracing::info!(name, bytes = bytes.len(), "Stored object");
        Ok(self.url_for(&name))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.fetcher.fetch(url).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn stores_under_content_addressed_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path(), "https://media.example.com/out/").unwrap();

        let url = store.store(b"frame".to_vec(), "video-1.mp4").await.unwrap();

        assert!(url.starts_with("https://media.example.com/out/video-"));
        assert!(url.ends_with(".mp4"));
        let name = url.rsplit('/').next().unwrap();
        assert_eq!(std::fs::read(dir.path().join(name)).unwrap(), b"frame");
    }

    #[tokio::test]
    async fn storing_same_bytes_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path(), "https://media.example.com").unwrap();

        let first = store.store(b"same".to_vec(), "image-1.png").await.unwrap();
        let second = store.store(b"same".to_vec(), "image-1.png").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_stores_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalMediaStore::new(dir.path(), "https://media.example.com").unwrap());
        let bytes = vec![7u8; 4 << 20];

        for _ in 0..20 {
            let writers: Vec<_> = (0..4)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let bytes = bytes.clone();
                    tokio::spawn(async move { store.store(bytes, "image-1.png").await })
                })
                .collect();

            let mut urls = Vec::new();
            for writer in writers {
                urls.push(writer.await.unwrap().unwrap());
            }
            urls.dedup();
            assert_eq!(urls.len(), 1);

            let name = urls[0].rsplit('/').next().unwrap().to_string();
            std::fs::remove_file(dir.path().join(name)).unwrap();
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested/media");
        let store = LocalMediaStore::new(&root, "https://media.example.com").unwrap();

        store.store(b"x".to_vec(), "masked-1.png").await.unwrap();
        assert!(root.is_dir());
    }
}
