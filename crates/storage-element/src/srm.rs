//! SRM storage backend
//!
//! SRM storage is only reachable through the `lcg-*` command line
//! utilities, so every operation spawns one tool invocation. Physical paths
//! are full SRM URLs (`srm://host:port/endpoint?SFN=/path`); tool output
//! carries bare site file names, which get the URL stub put back in front.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use storage_core::{normalize_prefix, Error, Result};
use tracing::instrument;

use crate::command::execute_checked;
use crate::{FileSize, PathStream, StorageBackend};

/// The server and endpoint part of an SRM URL, up to the site file name
static STUB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^srm://[A-Za-z0-9:.\-/]+\?SFN=").expect("valid SRM stub pattern"));

/// SRM storage backend driven by the `lcg-*` tools
#[derive(Debug, Clone)]
pub struct SrmStorage {
    prefix: String,
    tool_prefix: String,
}

impl SrmStorage {
    /// Create a new SrmStorage instance
    ///
    /// # Arguments
    /// * `url` - SRM URL the logical root maps onto
    /// * `tool_prefix` - Prefix of the tool names, e.g. `lcg-`
    ///
    /// Fails with [`Error::InvalidUrl`] unless `url` carries an
    /// `srm://host/endpoint?SFN=` stub.
    pub fn new(url: impl AsRef<str>, tool_prefix: impl Into<String>) -> Result<Self> {
        let url = url.as_ref();
        if !STUB_RE.is_match(url) {
            return Err(Error::InvalidUrl {
                url: url.to_string(),
            });
        }
        Ok(Self {
            prefix: normalize_prefix(url),
            tool_prefix: tool_prefix.into(),
        })
    }

    /// Run `<tool prefix><verb> <options> -b -D srmv2 <path>`
    async fn execute(&self, cmd: &str, path: &str, safe: bool) -> Result<String> {
        let mut words = cmd.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let program = format!("{}{}", self.tool_prefix, verb);

        let args: Vec<String> = words
            .chain(["-b", "-D", "srmv2", path])
            .map(str::to_string)
            .collect();

        execute_checked(&program, &args, safe).await
    }

    fn stub<'a>(&self, path: &'a str) -> Result<&'a str> {
        STUB_RE
            .find(path)
            .map(|m| m.as_str())
            .ok_or_else(|| Error::InvalidUrl {
                url: path.to_string(),
            })
    }
}

#[async_trait]
impl StorageBackend for SrmStorage {
    fn name(&self) -> &'static str {
        "srm"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    #[instrument(skip(self), fields(backend = "srm"))]
    async fn exists(&self, pfn: &str) -> Result<bool> {
        match self.execute("ls", pfn, false).await {
            Ok(_) => Ok(true),
            Err(Error::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn getsize(&self, _pfn: &str) -> Result<FileSize> {
        Ok(FileSize::Unknown)
    }

    #[instrument(skip(self), fields(backend = "srm"))]
    async fn isdir(&self, pfn: &str) -> Result<bool> {
        Ok(!self.isfile(pfn).await?)
    }

    #[instrument(skip(self), fields(backend = "srm"))]
    async fn isfile(&self, pfn: &str) -> Result<bool> {
        let output = self.execute("ls -l", pfn, false).await?;
        if output.lines().count() > 1 {
            return Ok(false);
        }
        Ok(!output.starts_with('d'))
    }

    #[instrument(skip(self), fields(backend = "srm"))]
    async fn list(&self, pfn: &str) -> Result<PathStream> {
        let stub = self.stub(pfn)?.to_string();
        let output = self.execute("ls", pfn, false).await?;

        let entries: Vec<Result<String>> = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Ok(format!("{}{}", stub, STUB_RE.replace(line, ""))))
            .collect();
        Ok(Box::pin(tokio_stream::iter(entries)))
    }

    async fn makedirs(&self, _pfn: &str) -> Result<()> {
        // directories are created implicitly on transfer
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "srm"))]
    async fn remove(&self, pfn: &str) -> Result<()> {
        // SRM does not care about directories, so failures are tolerated
        self.execute("del", pfn, true).await.map(|_| ())
    }
}
