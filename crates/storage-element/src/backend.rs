//! Storage backend trait definition
//!
//! Defines the async interface that all storage backends must implement.

use std::pin::Pin;

use async_trait::async_trait;
use storage_core::{lfn_to_pfn, pfn_to_lfn, Result};
use tokio_stream::Stream;

/// Lazy, single-pass sequence of paths returned by a listing
pub type PathStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Size of a file as reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSize {
    /// Size in bytes
    Bytes(u64),

    /// The backend cannot report sizes
    Unknown,
}

impl FileSize {
    /// Size in bytes, if known
    pub fn bytes(&self) -> Option<u64> {
        match self {
            FileSize::Bytes(n) => Some(*n),
            FileSize::Unknown => None,
        }
    }
}

/// Async trait for storage backends
///
/// Every operation takes a physical file name (PFN), i.e. a path already
/// prefixed with [`StorageBackend::prefix`]. Operations on paths that do
/// not exist fail with [`storage_core::Error::PathNotFound`], except
/// `exists`, which reports `false`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Prefix under which logical paths are found
    fn prefix(&self) -> &str;

    /// Translate a logical path into this backend's physical path
    fn lfn_to_pfn(&self, lfn: &str) -> String {
        lfn_to_pfn(self.prefix(), lfn)
    }

    /// Translate a physical path of this backend back into a logical one
    fn pfn_to_lfn(&self, pfn: &str) -> String {
        pfn_to_lfn(self.prefix(), pfn)
    }

    /// Check if a path exists
    async fn exists(&self, pfn: &str) -> Result<bool>;

    /// Size of the file at the given path
    async fn getsize(&self, pfn: &str) -> Result<FileSize>;

    /// Check if a path is a directory
    async fn isdir(&self, pfn: &str) -> Result<bool>;

    /// Check if a path is a file
    async fn isfile(&self, pfn: &str) -> Result<bool>;

    /// List the entries of a directory as physical paths
    async fn list(&self, pfn: &str) -> Result<PathStream>;

    /// Create a directory and all missing parents
    ///
    /// Succeeds if the directory already exists.
    async fn makedirs(&self, pfn: &str) -> Result<()>;

    /// Remove the given path
    async fn remove(&self, pfn: &str) -> Result<()>;
}
