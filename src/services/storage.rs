//! Raw file storage behind the catalog. Paths handed out here are opaque to callers.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::{CatalogError, Result};

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Writes `data` under `name` and returns the storage path to persist.
    async fn store(&self, name: &str, content_type: &str, data: Bytes, size: i64) -> Result<String>;

    async fn retrieve(&self, path: &str) -> Result<ByteStream>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn generate_url(&self, path: &str, expiry: Duration) -> Result<String>;

    async fn get_file_info(&self, path: &str) -> Result<FileInfo>;
}

fn check_size(data: &Bytes, size: i64) -> Result<()> {
    if data.len() as i64 != size {
        return Err(CatalogError::validation(format!(
            "declared size {size} does not match the {} bytes received",
            data.len()
        )));
    }
    Ok(())
}

fn expiring_url(base: &str, path: &str, expiry: Duration) -> String {
    let expiry = ChronoDuration::from_std(expiry).unwrap_or(ChronoDuration::hours(1));
    let expires_at = (Utc::now() + expiry).timestamp();
    format!("{}/{}?expires={expires_at}", base.trim_end_matches('/'), path)
}

fn not_found_or_storage(path: &str, err: io::Error) -> CatalogError {
    if err.kind() == io::ErrorKind::NotFound {
        CatalogError::not_found(format!("file '{path}'"))
    } else {
        CatalogError::Storage(format!("file '{path}': {err}"))
    }
}

/// Files on the local filesystem, rooted at `root`. URLs are `public_base_url` + path.
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Only plain relative paths below the root are accepted.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(CatalogError::validation(format!("invalid storage path '{path}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(&self, name: &str, content_type: &str, data: Bytes, size: i64) -> Result<String> {
        check_size(&data, size)?;
        let target = self.resolve(name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target).await?;
        let written = async {
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                warn!(path = name, error = %cleanup, "Failed to remove partially written file");
            }
            return Err(CatalogError::Storage(format!("file '{name}': {e}")));
        }
        debug!(path = name, content_type, size, "Stored file");
        Ok(name.to_string())
    }

    async fn retrieve(&self, path: &str) -> Result<ByteStream> {
        let target = self.resolve(path)?;
        let file = tokio::fs::File::open(&target)
            .await
            .map_err(|e| not_found_or_storage(path, e))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| not_found_or_storage(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    async fn generate_url(&self, path: &str, expiry: Duration) -> Result<String> {
        self.resolve(path)?;
        Ok(expiring_url(&self.public_base_url, path, expiry))
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        let target = self.resolve(path)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| not_found_or_storage(path, e))?;
        let last_modified: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
        Ok(FileInfo {
            size: meta.len(),
            content_type: mime_guess::from_path(&target)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            last_modified,
            etag: format!("\"{:x}-{:x}\"", meta.len(), last_modified.timestamp()),
        })
    }
}

struct StoredFile {
    data: Bytes,
    content_type: String,
    stored_at: DateTime<Utc>,
}

/// In-memory storage for tests.
#[derive(Default)]
pub struct MemoryStorage {
    files: DashMap<String, StoredFile>,
    fail_deletes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store(&self, name: &str, content_type: &str, data: Bytes, size: i64) -> Result<String> {
        check_size(&data, size)?;
        self.files.insert(
            name.to_string(),
            StoredFile {
                data,
                content_type: content_type.to_string(),
                stored_at: Utc::now(),
            },
        );
        Ok(name.to_string())
    }

    async fn retrieve(&self, path: &str) -> Result<ByteStream> {
        let data = self
            .files
            .get(path)
            .map(|file| file.data.clone())
            .ok_or_else(|| CatalogError::not_found(format!("file '{path}'")))?;
        Ok(stream::once(async move { Ok::<_, io::Error>(data) }).boxed())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CatalogError::Storage(format!("could not delete '{path}'")));
        }
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| CatalogError::not_found(format!("file '{path}'")))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.contains_key(path))
    }

    async fn generate_url(&self, path: &str, expiry: Duration) -> Result<String> {
        if !self.files.contains_key(path) {
            return Err(CatalogError::not_found(format!("file '{path}'")));
        }
        Ok(expiring_url("memory://files", path, expiry))
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| CatalogError::not_found(format!("file '{path}'")))?;
        Ok(FileInfo {
            size: file.data.len() as u64,
            content_type: file.content_type.clone(),
            last_modified: file.stored_at,
            etag: format!("\"{}\"", hex::encode(Sha256::digest(&file.data))),
        })
    }
}
