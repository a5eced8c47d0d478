//! Local filesystem storage backend

use std::path::Path;

use async_trait::async_trait;
use storage_core::{normalize_prefix, Error, Result};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use crate::{FileSize, PathStream, StorageBackend};

/// Local filesystem storage backend
///
/// Serves logical paths from a directory on a locally mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Directory the logical root maps onto
    prefix: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `prefix` - Directory to use as the logical root
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: normalize_prefix(prefix.as_ref()),
        }
    }

    async fn metadata(&self, pfn: &str) -> Result<std::fs::Metadata> {
        fs::metadata(pfn).await.map_err(|e| Error::from_io(pfn, e))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, pfn: &str) -> Result<bool> {
        Ok(fs::metadata(pfn).await.is_ok())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn getsize(&self, pfn: &str) -> Result<FileSize> {
        Ok(FileSize::Bytes(self.metadata(pfn).await?.len()))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn isdir(&self, pfn: &str) -> Result<bool> {
        Ok(self.metadata(pfn).await?.is_dir())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn isfile(&self, pfn: &str) -> Result<bool> {
        Ok(self.metadata(pfn).await?.is_file())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, pfn: &str) -> Result<PathStream> {
        let entries = fs::read_dir(pfn).await.map_err(|e| Error::from_io(pfn, e))?;
        let base = Path::new(pfn).to_path_buf();

        debug!(?base, "Listing directory");

        let stream = ReadDirStream::new(entries).map(move |entry| {
            entry
                .map(|e| base.join(e.file_name()).to_string_lossy().into_owned())
                .map_err(Error::Io)
        });
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn makedirs(&self, pfn: &str) -> Result<()> {
        fs::create_dir_all(pfn).await.map_err(|e| Error::from_io(pfn, e))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn remove(&self, pfn: &str) -> Result<()> {
        let result = if self.metadata(pfn).await?.is_dir() {
            fs::remove_dir_all(pfn).await
        } else {
            fs::remove_file(pfn).await
        };
        result.map_err(|e| Error::from_io(pfn, e))
    }
}
