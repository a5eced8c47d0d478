//! HDFS storage backend
//!
//! Drives the `hdfs dfs` client. Only built with the `hdfs` feature.

use async_trait::async_trait;
use storage_core::{normalize_prefix, Error, Result};
use tracing::instrument;

use crate::command::{execute, execute_checked};
use crate::{FileSize, PathStream, StorageBackend};

/// HDFS storage backend
#[derive(Debug, Clone)]
pub struct HdfsStorage {
    prefix: String,
    /// Namenode, passed as `-fs hdfs://<server>` when set
    server: Option<String>,
    command: String,
}

impl HdfsStorage {
    /// Create a new HdfsStorage instance
    ///
    /// # Arguments
    /// * `server` - Namenode address, empty for the client default
    /// * `prefix` - HDFS directory the logical root maps onto
    /// * `command` - Client binary, usually `hdfs`
    pub fn new(server: &str, prefix: impl AsRef<str>, command: impl Into<String>) -> Self {
        Self {
            prefix: normalize_prefix(prefix.as_ref()),
            server: (!server.is_empty()).then(|| server.to_string()),
            command: command.into(),
        }
    }

    fn args(&self, op: &[&str], pfn: &str) -> Vec<String> {
        let mut args = vec!["dfs".to_string()];
        if let Some(server) = &self.server {
            args.push("-fs".to_string());
            args.push(format!("hdfs://{}", server));
        }
        args.extend(op.iter().map(|s| s.to_string()));
        args.push(pfn.to_string());
        args
    }

    async fn test(&self, flag: &str, pfn: &str) -> Result<bool> {
        let output = execute(&self.command, &self.args(&["-test", flag], pfn)).await?;
        Ok(output.success)
    }

    /// `-stat` with the given format, telling missing paths apart
    async fn stat(&self, format: &str, pfn: &str) -> Result<String> {
        match execute_checked(&self.command, &self.args(&["-stat", format], pfn), false).await {
            Ok(out) => Ok(out.trim().to_string()),
            Err(e @ Error::CommandFailed { .. }) => {
                if self.test("-e", pfn).await? {
                    Err(e)
                } else {
                    Err(Error::PathNotFound {
                        path: pfn.to_string(),
                    })
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StorageBackend for HdfsStorage {
    fn name(&self) -> &'static str {
        "hdfs"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    #[instrument(skip(self), fields(backend = "hdfs"))]
    async fn exists(&self, pfn: &str) -> Result<bool> {
        self.test("-e", pfn).await
    }

    #[instrument(skip(self), fields(backend = "hdfs"))]
    async fn getsize(&self, pfn: &str) -> Result<FileSize> {
        let out = self.stat("%b", pfn).await?;
        out.parse::<u64>()
            .map(FileSize::Bytes)
            .map_err(|e| Error::Storage {
                message: format!("unexpected size '{}' for {}: {}", out, pfn, e),
            })
    }

    #[instrument(skip(self), fields(backend = "hdfs"))]
    async fn isdir(&self, pfn: &str) -> Result<bool> {
        Ok(self.stat("%F", pfn).await? == "directory")
    }

    #[instrument(skip(self), fields(backend = "hdfs"))]
    async fn isfile(&self, pfn: &str) -> Result<bool> {
        Ok(self.stat("%F", pfn).await? == "regular file")
    }

    #[instrument(skip(self), fields(backend = "hdfs"))]
    async fn list(&self, pfn: &str) -> Result<PathStream> {
        if !self.test("-e", pfn).await? {
            return Err(Error::PathNotFound {
                path: pfn.to_string(),
            });
        }
        let output = execute_checked(&self.command, &self.args(&["-ls", "-C"], pfn), false).await?;

        let entries: Vec<Result<String>> = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Ok(line.to_string()))
            .collect();
        Ok(Box::pin(tokio_stream::iter(entries)))
    }

    #[instrument(skip(self), fields(backend = "hdfs"))]
    async fn makedirs(&self, pfn: &str) -> Result<()> {
        execute_checked(&self.command, &self.args(&["-mkdir", "-p"], pfn), false)
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(backend = "hdfs"))]
    async fn remove(&self, pfn: &str) -> Result<()> {
        execute_checked(&self.command, &self.args(&["-rm", "-r"], pfn), false)
            .await
            .map(|_| ())
    }
}
